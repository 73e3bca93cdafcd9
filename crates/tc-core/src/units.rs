// tc-core/src/units.rs

use uom::si::f64::{
    Capacitance as UomCapacitance, ElectricCurrent as UomElectricCurrent,
    ElectricPotential as UomElectricPotential, ElectricalConductance as UomConductance,
    Frequency as UomFrequency, Length as UomLength,
    ThermodynamicTemperature as UomThermodynamicTemperature, Time as UomTime,
};

// Public canonical unit types (SI, f64)
pub type Capacitance = UomCapacitance;
pub type Conductance = UomConductance;
pub type Current = UomElectricCurrent;
pub type Frequency = UomFrequency;
pub type Length = UomLength;
pub type Temperature = UomThermodynamicTemperature;
pub type Time = UomTime;
pub type Voltage = UomElectricPotential;

#[inline]
pub fn volt(v: f64) -> Voltage {
    use uom::si::electric_potential::volt;
    Voltage::new::<volt>(v)
}

#[inline]
pub fn amp(v: f64) -> Current {
    use uom::si::electric_current::ampere;
    Current::new::<ampere>(v)
}

#[inline]
pub fn s(v: f64) -> Time {
    use uom::si::time::second;
    Time::new::<second>(v)
}

#[inline]
pub fn hz(v: f64) -> Frequency {
    use uom::si::frequency::hertz;
    Frequency::new::<hertz>(v)
}

#[inline]
pub fn um(v: f64) -> Length {
    use uom::si::length::micrometer;
    Length::new::<micrometer>(v)
}

#[inline]
pub fn k(v: f64) -> Temperature {
    use uom::si::thermodynamic_temperature::kelvin;
    Temperature::new::<kelvin>(v)
}

#[inline]
pub fn farad(v: f64) -> Capacitance {
    use uom::si::capacitance::farad;
    Capacitance::new::<farad>(v)
}

#[inline]
pub fn siemens(v: f64) -> Conductance {
    use uom::si::electrical_conductance::siemens;
    Conductance::new::<siemens>(v)
}

/// Plain-`f64` accessors in the SI base unit of each quantity.
pub mod raw {
    use super::*;

    #[inline]
    pub fn volts(v: Voltage) -> f64 {
        v.get::<uom::si::electric_potential::volt>()
    }

    #[inline]
    pub fn amps(v: Current) -> f64 {
        v.get::<uom::si::electric_current::ampere>()
    }

    #[inline]
    pub fn seconds(v: Time) -> f64 {
        v.get::<uom::si::time::second>()
    }

    #[inline]
    pub fn hertz(v: Frequency) -> f64 {
        v.get::<uom::si::frequency::hertz>()
    }

    #[inline]
    pub fn kelvin(v: Temperature) -> f64 {
        v.get::<uom::si::thermodynamic_temperature::kelvin>()
    }
}

pub mod constants {
    /// Elementary charge (C)
    pub const Q: f64 = 1.602_176_634e-19;
    /// Boltzmann constant (J/K)
    pub const KB: f64 = 1.380_649e-23;
    /// Vacuum permittivity (F/cm)
    pub const EPS0_F_PER_CM: f64 = 8.854_187_8128e-14;
    /// Default lattice temperature (K)
    pub const T_AMBIENT: f64 = 300.0;

    /// Thermal voltage kT/q at `t` kelvin.
    #[inline]
    pub fn thermal_voltage(t: f64) -> f64 {
        KB * t / Q
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_round_trip() {
        assert_eq!(raw::volts(volt(0.7)), 0.7);
        assert_eq!(raw::amps(amp(1e-3)), 1e-3);
        assert_eq!(raw::seconds(s(1e-9)), 1e-9);
        assert_eq!(raw::hertz(hz(1e6)), 1e6);
        assert_eq!(raw::kelvin(k(300.0)), 300.0);
        let _l = um(1.0);
        let _c = farad(1e-15);
        let _g = siemens(1e-12);
    }

    #[test]
    fn thermal_voltage_room_temperature() {
        let vt = constants::thermal_voltage(300.0);
        assert!((vt - 0.025_852).abs() < 1e-5);
    }
}
