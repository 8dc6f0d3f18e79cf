//! Drivers for the bench instruments.
//!
//! Each driver owns a [`ScpiInstrument`](crate::instrument::ScpiInstrument)
//! and maps one method to one vendor command.

pub mod agilent_8163b;
pub mod agilent_e364x;
pub mod fiberlabs_amp;
pub mod keysight_86100d;
pub mod thorlabs_pm100;
pub mod tti_tgf3162;

pub use agilent_8163b::{Agilent8163B, Slot};
pub use agilent_e364x::AgilentE3640A;
pub use fiberlabs_amp::FiberlabsAmp;
pub use keysight_86100d::Keysight86100D;
pub use thorlabs_pm100::ThorlabsPM100;
pub use tti_tgf3162::TtiTGF3162;
