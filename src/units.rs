//! SI scale factors for writing quantities the way models are usually written.
//!
//! All quantities in the library are plain `f64` values in SI base units, so `10.0 * MS` is `0.01` seconds.
//! Units are only carried as labels on state variables, see [`crate::population::Population::unit`].

pub const SECOND: f64 = 1.0;
pub const MS: f64 = 1e-3;
pub const US: f64 = 1e-6;
pub const HZ: f64 = 1.0;

pub const VOLT: f64 = 1.0;
pub const MV: f64 = 1e-3;

pub const AMP: f64 = 1.0;
pub const NA: f64 = 1e-9;
pub const PA: f64 = 1e-12;

pub const OHM: f64 = 1.0;
pub const MOHM: f64 = 1e6;

pub const FARAD: f64 = 1.0;
pub const PF: f64 = 1e-12;

pub const SIEMENS: f64 = 1.0;
pub const NS: f64 = 1e-9;
