//! Advanced physical model flags assigned to regions by the MODEL card.

use crate::error::SystemResult;
use serde::{Deserialize, Serialize};
use tc_deck::Card;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MobilityForce {
    EJ,
    ESimple,
    EQF,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IiForce {
    EdotJ,
    ESide,
    EVector,
    GradQf,
}

/// Which energy balance equations are solved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EbLevel {
    None,
    Tn,
    Tp,
    Tl,
    TnTp,
    TnTl,
    TpTl,
    All,
}

impl EbLevel {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "none" => EbLevel::None,
            "te" => EbLevel::Tn,
            "th" => EbLevel::Tp,
            "tl" => EbLevel::Tl,
            "teth" => EbLevel::TnTp,
            "tetl" => EbLevel::TnTl,
            "thtl" => EbLevel::TpTl,
            "all" => EbLevel::All,
            _ => return None,
        })
    }

    pub fn has_tl(self) -> bool {
        matches!(self, EbLevel::Tl | EbLevel::TnTl | EbLevel::TpTl | EbLevel::All)
    }

    /// Same carrier temperature set with the lattice temperature added.
    fn with_tl(self) -> Self {
        match self {
            EbLevel::None | EbLevel::Tl => EbLevel::Tl,
            EbLevel::Tn | EbLevel::TnTl => EbLevel::TnTl,
            EbLevel::Tp | EbLevel::TpTl => EbLevel::TpTl,
            EbLevel::TnTp | EbLevel::All => EbLevel::All,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdvancedModel {
    pub esurface: bool,
    pub high_field_mobility: bool,
    pub high_field_self_consistent: bool,
    pub quasi_fermi_truncation: f64,
    pub mobility_force: MobilityForce,
    pub impact_ionization: bool,
    pub ii_force: IiForce,
    pub hot_carrier: bool,
    pub fn_tunneling: bool,
    pub dir_tunneling: bool,
    pub tunneling_self_consistent: bool,
    pub band_band_tunneling: bool,
    pub fermi: bool,
    pub incomplete_ionization: bool,
    pub trap: bool,
    pub eb_level: EbLevel,
    pub dg_electron: bool,
    pub dg_hole: bool,
    pub qn_factor: f64,
    pub qp_factor: f64,
    pub q_min_concentration: f64,
    /// Lattice temperature solved because another region needs it.
    pub forced_temperature: bool,
}

impl Default for AdvancedModel {
    fn default() -> Self {
        Self {
            esurface: true,
            high_field_mobility: true,
            high_field_self_consistent: true,
            quasi_fermi_truncation: 1e-2,
            mobility_force: MobilityForce::ESimple,
            impact_ionization: false,
            ii_force: IiForce::GradQf,
            hot_carrier: false,
            fn_tunneling: false,
            dir_tunneling: false,
            tunneling_self_consistent: false,
            band_band_tunneling: false,
            fermi: false,
            incomplete_ionization: false,
            trap: false,
            eb_level: EbLevel::None,
            dg_electron: false,
            dg_hole: false,
            qn_factor: 1.0,
            qp_factor: 1.0,
            q_min_concentration: 1.0,
            forced_temperature: false,
        }
    }
}

fn enum_of(card: &Card, names: &[&str]) -> SystemResult<Option<String>> {
    for name in names {
        if card.is_parameter_exist(name) {
            return Ok(Some(card.get_enum(name, "")?));
        }
    }
    Ok(None)
}

impl AdvancedModel {
    /// Model built from a MODEL card; unspecified flags take their defaults.
    pub fn from_card(card: &Card) -> SystemResult<Self> {
        let mut m = Self {
            esurface: card.get_bool("esurface", true)?,
            high_field_mobility: card.get_bool(
                "h.mob",
                card.get_bool("highfieldmobility", true)?,
            )?,
            high_field_self_consistent: card.get_bool("h.mob.selfconsistent", true)?,
            quasi_fermi_truncation: card.get_real("quasifermicarriertrucation", 1e-2)?,
            hot_carrier: card.get_bool("hotcarrier", false)?,
            fn_tunneling: card.get_bool("fn.tunneling", card.get_bool("fntunneling", false)?)?,
            dir_tunneling: card.get_bool("dir.tunneling", false)?,
            tunneling_self_consistent: card.get_bool("tunneling.selfconsistent", false)?,
            fermi: card.get_bool("fermi", false)?,
            incomplete_ionization: card.get_bool("incompleteionization", false)?,
            trap: card.get_bool("trap", false)?,
            dg_electron: card.get_bool("dg.elec", false)?,
            dg_hole: card.get_bool("dg.hole", false)?,
            qn_factor: card.get_real("qnfactor", 1.0)?,
            qp_factor: card.get_real("qpfactor", 1.0)?,
            q_min_concentration: card.get_real("qminconcentration", 1.0)?,
            ..Self::default()
        };

        match enum_of(card, &["mob.force", "mobility.force"])?.as_deref() {
            Some("ej") => m.mobility_force = MobilityForce::EJ,
            Some("esimple") => m.mobility_force = MobilityForce::ESimple,
            Some("eqf") => m.mobility_force = MobilityForce::EQF,
            _ => {}
        }

        if enum_of(card, &["impactionization", "ii"])?.as_deref() == Some("local") {
            m.impact_ionization = true;
            m.ii_force = match card.get_enum("ii.force", "gradqf")?.as_str() {
                "edotj" => IiForce::EdotJ,
                "eside" => IiForce::ESide,
                "evector" => IiForce::EVector,
                _ => IiForce::GradQf,
            };
        }

        m.band_band_tunneling =
            enum_of(card, &["bandbandtunneling", "bbt"])?.as_deref() == Some("local");

        if let Some(level) = enum_of(card, &["eb.level"])?.as_deref().and_then(EbLevel::parse) {
            m.eb_level = level;
        }
        Ok(m)
    }

    pub fn enable_tl(&self) -> bool {
        self.eb_level.has_tl() || self.forced_temperature
    }

    /// Turn on the lattice temperature equation without touching the
    /// carrier temperature selection.
    pub fn force_temperature_usage(&mut self) {
        if !self.eb_level.has_tl() {
            self.eb_level = self.eb_level.with_tl();
            self.forced_temperature = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SourceLocation;

    fn card() -> Card {
        Card::new("MODEL", SourceLocation::new("deck.yaml", 3))
    }

    #[test]
    fn defaults_follow_card_omissions() {
        let m = AdvancedModel::from_card(&card()).unwrap();
        assert_eq!(m, AdvancedModel::default());
        assert!(!m.enable_tl());
    }

    #[test]
    fn enumerated_flags_parse_with_aliases() {
        let c = card()
            .with("mobility.force", "EQF")
            .with("ii", "local")
            .with("ii.force", "edotj")
            .with("bbt", "local")
            .with("eb.level", "tetl")
            .with("h.mob", false);
        let m = AdvancedModel::from_card(&c).unwrap();
        assert_eq!(m.mobility_force, MobilityForce::EQF);
        assert!(m.impact_ionization);
        assert_eq!(m.ii_force, IiForce::EdotJ);
        assert!(m.band_band_tunneling);
        assert_eq!(m.eb_level, EbLevel::TnTl);
        assert!(!m.high_field_mobility);
        assert!(m.enable_tl());
    }

    #[test]
    fn ii_force_ignored_without_local_model() {
        let c = card().with("ii.force", "eside");
        let m = AdvancedModel::from_card(&c).unwrap();
        assert!(!m.impact_ionization);
        assert_eq!(m.ii_force, IiForce::GradQf);
    }

    #[test]
    fn forcing_temperature_keeps_carrier_levels() {
        let mut m = AdvancedModel {
            eb_level: EbLevel::TnTp,
            ..AdvancedModel::default()
        };
        m.force_temperature_usage();
        assert_eq!(m.eb_level, EbLevel::All);
        assert!(m.forced_temperature);

        let mut already = AdvancedModel {
            eb_level: EbLevel::Tl,
            ..AdvancedModel::default()
        };
        already.force_temperature_usage();
        assert!(!already.forced_temperature);
    }
}
