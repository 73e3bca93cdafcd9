//! Analytic profile solvers for doping and mole fraction.
//!
//! Profiles are pure functions of node position, so re-running a solver on
//! a rebuilt mesh reproduces the field exactly where nodes coincide.

use crate::error::{SystemError, SystemResult};
use crate::material::{Compound, MaterialClass};
use crate::region::Region;
use regex::Regex;
use tc_deck::{Card, Deck};
use tc_mesh::{Mesh, Point};
use tracing::debug;

/// Fills region variables from deck-defined profiles.
pub trait ProfileSolver: Send {
    fn name(&self) -> &'static str;

    fn solve(&self, mesh: &Mesh, regions: &mut [Region]) -> SystemResult<()>;
}

fn region_filter(card: &Card) -> SystemResult<Option<Regex>> {
    let pattern = card.get_string("region", "")?;
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("^(?:{pattern})$"))
        .map(Some)
        .map_err(|e| SystemError::InvalidPattern {
            pattern,
            message: e.to_string(),
        })
}

fn applies(filter: &Option<Regex>, region: &Region) -> bool {
    filter.as_ref().is_none_or(|re| re.is_match(region.name()))
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Shape {
    Uniform,
    /// Gaussian decay outside the box with per-axis characteristic lengths.
    Gauss([f64; 3]),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Ion {
    Donor,
    Acceptor,
}

#[derive(Clone, Debug)]
struct DopingProfile {
    ion: Ion,
    peak: f64,
    lo: Point,
    hi: Point,
    shape: Shape,
    filter: Option<Regex>,
}

fn card_box(card: &Card) -> SystemResult<(Point, Point)> {
    let mut lo = [f64::MIN; 3];
    let mut hi = [f64::MAX; 3];
    for (d, a) in ["x", "y", "z"].iter().enumerate() {
        lo[d] = card.get_real(&format!("{a}.min"), f64::MIN)?;
        hi[d] = card.get_real(&format!("{a}.max"), f64::MAX)?;
    }
    Ok((lo, hi))
}

impl DopingProfile {
    fn from_card(card: &Card) -> SystemResult<Self> {
        let ion = match card.get_enum("ion", "donor")?.as_str() {
            "donor" | "n" => Ion::Donor,
            "acceptor" | "p" => Ion::Acceptor,
            other => {
                return Err(SystemError::InvalidInput {
                    what: format!("{}: unknown dopant ion {other}", card.location),
                });
            }
        };
        let shape = match card.get_enum("type", "uniform")?.as_str() {
            "uniform" => Shape::Uniform,
            "gauss" | "gaussian" => {
                let chars = [
                    card.get_real("x.char", 0.1)?,
                    card.get_real("y.char", 0.1)?,
                    card.get_real("z.char", 0.1)?,
                ];
                if chars.iter().any(|&c| c <= 0.0) {
                    return Err(SystemError::InvalidInput {
                        what: format!("{}: characteristic lengths must be positive", card.location),
                    });
                }
                Shape::Gauss(chars)
            }
            other => {
                return Err(SystemError::InvalidInput {
                    what: format!("{}: unknown profile type {other}", card.location),
                });
            }
        };
        let (lo, hi) = card_box(card)?;
        Ok(Self {
            ion,
            peak: card.get_real("n.peak", 0.0)?.abs(),
            lo,
            hi,
            shape,
            filter: region_filter(card)?,
        })
    }

    fn value(&self, p: &Point) -> f64 {
        match self.shape {
            Shape::Uniform => {
                let inside = (0..3).all(|d| p[d] >= self.lo[d] && p[d] <= self.hi[d]);
                if inside { self.peak } else { 0.0 }
            }
            Shape::Gauss(chars) => {
                let mut f = self.peak;
                for d in 0..3 {
                    let gap = (self.lo[d] - p[d]).max(p[d] - self.hi[d]).max(0.0);
                    f *= (-(gap / chars[d]).powi(2)).exp();
                }
                f
            }
        }
    }
}

/// Doping from PROFILE cards; contributions of every card are summed into
/// `doping.na`/`doping.nd` of the semiconductor regions they apply to.
#[derive(Debug)]
pub struct DopingAnalytic {
    profiles: Vec<DopingProfile>,
}

impl DopingAnalytic {
    pub fn from_deck(deck: &Deck) -> SystemResult<Option<Self>> {
        let profiles = deck
            .cards_with_key("PROFILE")
            .map(DopingProfile::from_card)
            .collect::<SystemResult<Vec<_>>>()?;
        Ok((!profiles.is_empty()).then_some(Self { profiles }))
    }
}

impl ProfileSolver for DopingAnalytic {
    fn name(&self) -> &'static str {
        "doping"
    }

    fn solve(&self, mesh: &Mesh, regions: &mut [Region]) -> SystemResult<()> {
        for region in regions.iter_mut().filter(|r| r.class() == MaterialClass::Semiconductor) {
            let mut na = vec![0.0; region.n_nodes()];
            let mut nd = vec![0.0; region.n_nodes()];
            for profile in self.profiles.iter().filter(|p| applies(&p.filter, region)) {
                let target = match profile.ion {
                    Ion::Donor => &mut nd,
                    Ion::Acceptor => &mut na,
                };
                for (slot, &n) in target.iter_mut().zip(region.nodes()) {
                    *slot += profile.value(&mesh.nodes()[n]);
                }
            }
            region.set_variable("doping.na", na)?;
            region.set_variable("doping.nd", nd)?;
        }
        debug!(profiles = self.profiles.len(), "doping profiles applied");
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct MoleProfile {
    x: f64,
    x_end: f64,
    y: f64,
    y_end: f64,
    /// Grading runs along the y axis between these coordinates (µm).
    span: (f64, f64),
    filter: Option<Regex>,
}

impl MoleProfile {
    fn from_card(card: &Card) -> SystemResult<Self> {
        let x = card.get_real("x.mole", 0.0)?;
        let y = card.get_real("y.mole", 0.0)?;
        let m = Self {
            x,
            x_end: card.get_real("x.mole.end", x)?,
            y,
            y_end: card.get_real("y.mole.end", y)?,
            span: (card.get_real("y.min", 0.0)?, card.get_real("y.max", 0.0)?),
            filter: region_filter(card)?,
        };
        let fractions = [m.x, m.x_end, m.y, m.y_end];
        if fractions.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(SystemError::InvalidInput {
                what: format!("{}: mole fractions must lie in [0, 1]", card.location),
            });
        }
        Ok(m)
    }

    fn at(&self, p: &Point) -> (f64, f64) {
        let (a, b) = self.span;
        let s = if b > a { ((p[1] - a) / (b - a)).clamp(0.0, 1.0) } else { 0.0 };
        (self.x + s * (self.x_end - self.x), self.y + s * (self.y_end - self.y))
    }
}

/// Mole fractions from MOLE cards for compound semiconductor regions.
#[derive(Debug)]
pub struct MoleAnalytic {
    profiles: Vec<MoleProfile>,
}

impl MoleAnalytic {
    pub fn from_deck(deck: &Deck) -> SystemResult<Option<Self>> {
        let profiles = deck
            .cards_with_key("MOLE")
            .map(MoleProfile::from_card)
            .collect::<SystemResult<Vec<_>>>()?;
        Ok((!profiles.is_empty()).then_some(Self { profiles }))
    }
}

impl ProfileSolver for MoleAnalytic {
    fn name(&self) -> &'static str {
        "mole"
    }

    fn solve(&self, mesh: &Mesh, regions: &mut [Region]) -> SystemResult<()> {
        for region in regions.iter_mut() {
            let compound = region.material().compound;
            if compound == Compound::None {
                continue;
            }
            // last matching card wins
            let Some(profile) = self.profiles.iter().rev().find(|p| applies(&p.filter, region)) else {
                continue;
            };
            let (xs, ys): (Vec<f64>, Vec<f64>) = region
                .nodes()
                .iter()
                .map(|&n| profile.at(&mesh.nodes()[n]))
                .unzip();
            region.set_variable("mole.x", xs)?;
            if compound == Compound::Complex {
                region.set_variable("mole.y", ys)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::material;
    use tc_core::SourceLocation;

    fn card(key: &str) -> Card {
        Card::new(key, SourceLocation::new("d.yaml", 7))
    }

    fn line_mesh() -> Mesh {
        let mut m = Mesh::new(2);
        for i in 0..5 {
            m.add_node([i as f64 * 0.5, 0.0, 0.0]);
        }
        m
    }

    #[test]
    fn uniform_and_gaussian_profiles_sum() {
        let mesh = line_mesh();
        let deck = Deck::new(
            "d",
            vec![
                card("PROFILE").with("ion", "acceptor").with("n.peak", 1e16),
                card("PROFILE")
                    .with("type", "gauss")
                    .with("n.peak", 1e19)
                    .with("x.min", 0.0)
                    .with("x.max", 0.5)
                    .with("x.char", 0.5),
            ],
        );
        let solver = DopingAnalytic::from_deck(&deck).unwrap().unwrap();
        let mut regions = vec![Region::new("si", 0, material("Si").unwrap(), (0..5).collect())];
        solver.solve(&mesh, &mut regions).unwrap();
        let nd = regions[0].variable("doping.nd").unwrap();
        let na = regions[0].variable("doping.na").unwrap();
        assert_eq!(na, &[1e16; 5]);
        assert_eq!(nd[0], 1e19);
        assert_eq!(nd[1], 1e19);
        assert!((nd[2] / 1e19 - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn region_pattern_selects_regions() {
        let mesh = line_mesh();
        let deck = Deck::new(
            "d",
            vec![card("PROFILE").with("region", "n.*").with("n.peak", 1e17)],
        );
        let solver = DopingAnalytic::from_deck(&deck).unwrap().unwrap();
        let si = material("Si").unwrap();
        let mut regions = vec![
            Region::new("nside", 0, si, vec![0, 1]),
            Region::new("pside", 1, si, vec![3, 4]),
        ];
        solver.solve(&mesh, &mut regions).unwrap();
        assert_eq!(regions[0].variable("doping.nd").unwrap(), &[1e17, 1e17]);
        assert_eq!(regions[1].variable("doping.nd").unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn no_cards_no_solver() {
        let deck = Deck::new("d", vec![]);
        assert!(DopingAnalytic::from_deck(&deck).unwrap().is_none());
        assert!(MoleAnalytic::from_deck(&deck).unwrap().is_none());
    }

    #[test]
    fn mole_fraction_grades_along_y() {
        let mut mesh = Mesh::new(2);
        for j in 0..3 {
            mesh.add_node([0.0, j as f64, 0.0]);
        }
        let deck = Deck::new(
            "d",
            vec![card("MOLE")
                .with("x.mole", 0.1)
                .with("x.mole.end", 0.3)
                .with("y.min", 0.0)
                .with("y.max", 2.0)],
        );
        let solver = MoleAnalytic::from_deck(&deck).unwrap().unwrap();
        let mut regions = vec![Region::new("barrier", 0, material("AlGaAs").unwrap(), vec![0, 1, 2])];
        solver.solve(&mesh, &mut regions).unwrap();
        let x = regions[0].variable("mole.x").unwrap();
        assert!((x[1] - 0.2).abs() < 1e-12);
        assert!((x[2] - 0.3).abs() < 1e-12);

        let bad = Deck::new("d", vec![card("MOLE").with("x.mole", 1.5)]);
        assert!(MoleAnalytic::from_deck(&bad).is_err());
    }
}
