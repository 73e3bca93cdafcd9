//! Electrical sources and their attachment to electrodes.

use crate::error::{SystemError, SystemResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tc_deck::Card;

/// Time dependence of a source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Waveform {
    Dc {
        value: f64,
    },
    Sin {
        offset: f64,
        amplitude: f64,
        frequency: f64,
        delay: f64,
        /// Exponential damping (1/s).
        alpha: f64,
    },
    Pulse {
        low: f64,
        high: f64,
        delay: f64,
        rise: f64,
        fall: f64,
        width: f64,
        period: f64,
    },
}

impl Waveform {
    pub fn value(&self, t: f64) -> f64 {
        match *self {
            Waveform::Dc { value } => value,
            Waveform::Sin {
                offset,
                amplitude,
                frequency,
                delay,
                alpha,
            } => {
                if t < delay {
                    offset
                } else {
                    let dt = t - delay;
                    offset + amplitude * (-alpha * dt).exp() * (2.0 * PI * frequency * dt).sin()
                }
            }
            Waveform::Pulse {
                low,
                high,
                delay,
                rise,
                fall,
                width,
                period,
            } => {
                if t < delay {
                    return low;
                }
                let mut dt = t - delay;
                if period > 0.0 {
                    dt %= period;
                }
                if dt < rise {
                    low + (high - low) * dt / rise
                } else if dt < rise + width {
                    high
                } else if dt < rise + width + fall {
                    high + (low - high) * (dt - rise - width) / fall
                } else {
                    low
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Voltage,
    Current,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub kind: SourceKind,
    pub waveform: Waveform,
}

impl Source {
    /// Source defined by a VSOURCE or ISOURCE card.
    pub fn from_card(card: &Card) -> SystemResult<Self> {
        let name = card.require_string("id")?;
        let (kind, p) = match card.key() {
            "VSOURCE" => (SourceKind::Voltage, 'v'),
            "ISOURCE" => (SourceKind::Current, 'i'),
            other => {
                return Err(SystemError::InvalidInput {
                    what: format!("{}: {other} does not define a source", card.location),
                });
            }
        };
        let default_type = format!("{p}dc");
        let ty = card.get_enum("type", &default_type)?;
        let get = |suffix: &str, default: f64| card.get_real(&format!("{p}{suffix}"), default);
        let waveform = match ty.strip_prefix(p) {
            Some("dc") => Waveform::Dc {
                value: get("const", 0.0)?,
            },
            Some("sin") => Waveform::Sin {
                offset: get("0", 0.0)?,
                amplitude: get("amp", 0.0)?,
                frequency: card.get_real("freq", 0.0)?,
                delay: card.get_real("td", 0.0)?,
                alpha: card.get_real("alpha", 0.0)?,
            },
            Some("pulse") => {
                let w = Waveform::Pulse {
                    low: get("1", 0.0)?,
                    high: get("2", 0.0)?,
                    delay: card.get_real("td", 0.0)?,
                    rise: card.get_real("tr", 1e-9)?,
                    fall: card.get_real("tf", 1e-9)?,
                    width: card.get_real("pw", 5e-9)?,
                    period: card.get_real("pr", 1e-8)?,
                };
                if let Waveform::Pulse { rise, fall, .. } = w
                    && (rise <= 0.0 || fall <= 0.0)
                {
                    return Err(SystemError::InvalidInput {
                        what: format!("{}: pulse source {name} needs tr > 0 and tf > 0", card.location),
                    });
                }
                w
            }
            _ => {
                return Err(SystemError::InvalidInput {
                    what: format!("{}: unknown source type {ty}", card.location),
                });
            }
        };
        Ok(Self {
            name,
            kind,
            waveform,
        })
    }
}

/// What drives an electrode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Attachment {
    Voltage(Vec<String>),
    Current(Vec<String>),
    ConstVoltage(f64),
    ConstCurrent(f64),
}

/// Instantaneous drive of an electrode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Drive {
    Voltage(f64),
    Current(f64),
}

impl Drive {
    pub fn value(self) -> f64 {
        match self {
            Drive::Voltage(v) | Drive::Current(v) => v,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceSet {
    sources: BTreeMap<String, Source>,
    attachments: BTreeMap<String, Attachment>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: Source) -> SystemResult<()> {
        if self.sources.contains_key(&source.name) {
            return Err(SystemError::Duplicate {
                what: "source",
                name: source.name,
            });
        }
        self.sources.insert(source.name.clone(), source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> SystemResult<&Source> {
        self.sources.get(name).ok_or_else(|| SystemError::UnknownSource {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Attach to `electrode`, replacing any earlier attachment. Source lists
    /// must name defined sources of the matching kind.
    pub fn attach(&mut self, electrode: &str, attachment: Attachment) -> SystemResult<()> {
        let check = |names: &[String], kind: SourceKind| -> SystemResult<()> {
            for n in names {
                let s = self.get(n)?;
                if s.kind != kind {
                    return Err(SystemError::InvalidInput {
                        what: format!("source {n} cannot drive electrode {electrode} as {kind:?}"),
                    });
                }
            }
            Ok(())
        };
        match &attachment {
            Attachment::Voltage(names) => check(names, SourceKind::Voltage)?,
            Attachment::Current(names) => check(names, SourceKind::Current)?,
            Attachment::ConstVoltage(_) | Attachment::ConstCurrent(_) => {}
        }
        self.attachments.insert(electrode.to_string(), attachment);
        Ok(())
    }

    pub fn attachment(&self, electrode: &str) -> Option<&Attachment> {
        self.attachments.get(electrode)
    }

    /// Drive of `electrode` at time `t`; unattached electrodes are grounded.
    pub fn drive(&self, electrode: &str, t: f64) -> Drive {
        let sum = |names: &[String]| -> f64 {
            names
                .iter()
                .filter_map(|n| self.sources.get(n))
                .map(|s| s.waveform.value(t))
                .sum()
        };
        match self.attachments.get(electrode) {
            None => Drive::Voltage(0.0),
            Some(Attachment::ConstVoltage(v)) => Drive::Voltage(*v),
            Some(Attachment::ConstCurrent(i)) => Drive::Current(*i),
            Some(Attachment::Voltage(names)) => Drive::Voltage(sum(names)),
            Some(Attachment::Current(names)) => Drive::Current(sum(names)),
        }
    }

    pub fn is_current_driven(&self, electrode: &str) -> bool {
        matches!(
            self.attachments.get(electrode),
            Some(Attachment::Current(_) | Attachment::ConstCurrent(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SourceLocation;

    fn card(key: &str) -> Card {
        Card::new(key, SourceLocation::new("d.yaml", 1))
    }

    #[test]
    fn pulse_shape() {
        let w = Waveform::Pulse {
            low: 0.0,
            high: 1.0,
            delay: 1.0,
            rise: 1.0,
            fall: 1.0,
            width: 2.0,
            period: 10.0,
        };
        assert_eq!(w.value(0.5), 0.0);
        assert_eq!(w.value(1.5), 0.5);
        assert_eq!(w.value(3.0), 1.0);
        assert_eq!(w.value(4.5), 0.5);
        assert_eq!(w.value(8.0), 0.0);
        assert_eq!(w.value(12.5), 0.5);
    }

    #[test]
    fn sources_from_cards() {
        let v = Source::from_card(&card("VSOURCE").with("id", "vs").with("type", "vsin").with("vamp", 0.1).with("freq", 1e6)).unwrap();
        assert_eq!(v.kind, SourceKind::Voltage);
        assert!((v.waveform.value(0.25e-6) - 0.1).abs() < 1e-12);

        let i = Source::from_card(&card("ISOURCE").with("id", "is").with("iconst", 1e-3)).unwrap();
        assert_eq!(i.waveform, Waveform::Dc { value: 1e-3 });

        assert!(Source::from_card(&card("VSOURCE").with("id", "x").with("type", "vsquare")).is_err());
        assert!(Source::from_card(&card("VSOURCE")).is_err());
    }

    #[test]
    fn attachments_drive_electrodes() {
        let mut set = SourceSet::new();
        set.add(Source {
            name: "v1".into(),
            kind: SourceKind::Voltage,
            waveform: Waveform::Dc { value: 0.5 },
        })
        .unwrap();
        set.add(Source {
            name: "v2".into(),
            kind: SourceKind::Voltage,
            waveform: Waveform::Dc { value: 0.25 },
        })
        .unwrap();
        assert!(matches!(
            set.add(Source {
                name: "v1".into(),
                kind: SourceKind::Current,
                waveform: Waveform::Dc { value: 0.0 },
            }),
            Err(SystemError::Duplicate { .. })
        ));

        assert_eq!(set.drive("anode", 0.0), Drive::Voltage(0.0));
        set.attach("anode", Attachment::Voltage(vec!["v1".into(), "v2".into()])).unwrap();
        assert_eq!(set.drive("anode", 0.0), Drive::Voltage(0.75));
        assert!(matches!(
            set.attach("anode", Attachment::Voltage(vec!["nope".into()])),
            Err(SystemError::UnknownSource { .. })
        ));
        assert!(set.attach("anode", Attachment::Current(vec!["v1".into()])).is_err());

        set.attach("cathode", Attachment::ConstCurrent(1e-6)).unwrap();
        assert!(set.is_current_driven("cathode"));
        assert_eq!(set.drive("cathode", 5.0).value(), 1e-6);
    }
}
