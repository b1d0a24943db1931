//! Driver for FPGA-hosted OpenCores I2C controllers.
//!
//! An FPGA exposes a bank of OpenCores I2C engines through eight-register
//! memory-mapped windows. This crate drives one transaction at a time per
//! controller: a message-chain state machine sequences START, DATA and STOP
//! commands, classifies acknowledgement and arbitration failures, and
//! dispatches vendor special operations (mux select, controller reset,
//! slave reset) multiplexed over a reserved pseudo-address.
//!
//! Device discovery hands the crate a fixed register base and controller
//! count ([`OcoresDevice::attach`]); everything else is plain synchronous
//! calls, with [`OcoresController::notify`] as the hook for hosts that wire
//! up the completion interrupt. Polling is the reference mode.

#[macro_use]
extern crate derive_builder;

pub mod common;
pub mod error;
pub mod registers;

pub(crate) mod core;
mod master;

pub use crate::common::functionality::I2cFuncFlags;
pub use crate::common::{
    Message, MsgFlags, CBUS_ADDR, SPECIAL_MUX_SET, SPECIAL_NORMAL, SPECIAL_RST_CONTROLLER,
    SPECIAL_RST_SLAVE,
};
pub use crate::error::{Error, Result};
pub use crate::master::{OcoresController, OcoresDevice};
pub use crate::registers::{OcoresRegistersRef, Reg, RegisterIo};

/// How a transfer waits for command completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XferMode {
    /// Poll the transfer-in-progress bit with adaptive sleeps. This is the
    /// reference mode.
    #[default]
    Polling,
    /// Block on [`OcoresController::notify`] from the host's interrupt
    /// handler.
    Interrupt,
}

/// Trace filtering for the `log` output.
///
/// Replaces the dynamically adjustable module parameters of kernel-style
/// drivers with a configuration object injected at construction; it narrows
/// tracing without any functional effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceFilter {
    /// Only trace transactions on the controller with this index.
    pub controller: Option<usize>,
    /// Only trace transactions addressed to this slave.
    pub slave: Option<u16>,
}

impl TraceFilter {
    pub(crate) fn pass(&self, controller: usize, slave: u16) -> bool {
        self.controller.map_or(true, |c| c == controller)
            && self.slave.map_or(true, |s| s == slave)
    }
}

/// Driver configuration shared by the controllers of one device.
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct OcoresDriverConfig {
    /// Completion strategy.
    pub mode: XferMode,
    /// Input clock feeding the controllers, in kHz.
    pub clock_khz: u32,
    /// Target bus frequency, in kHz.
    pub bus_khz: u32,
    /// Pad delay between bus commands, in microseconds, for devices that
    /// need a pause between operations. Zero disables the pad.
    pub pad_time_us: u64,
    /// Trace filtering for the `log` output.
    pub trace: TraceFilter,
}

impl Default for OcoresDriverConfig {
    fn default() -> OcoresDriverConfig {
        OcoresDriverConfig {
            mode: XferMode::Polling,
            clock_khz: 62_500,
            bus_khz: 100,
            pad_time_us: 0,
            trace: TraceFilter::default(),
        }
    }
}

impl OcoresDriverConfig {
    /// Clock prescale divisor programmed during the enable sequence.
    ///
    /// OpenCores formula: `prescale = clk / (5 * scl) - 1`.
    pub fn prescale(&self) -> u16 {
        (self.clock_khz / (5 * self.bus_khz)).saturating_sub(1) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prescale_matches_the_reference_divisor() {
        // 62.5 MHz input clock at 100 kHz bus speed
        assert_eq!(OcoresDriverConfig::default().prescale(), 124);
    }

    #[test]
    fn prescale_follows_the_bus_speed() {
        let config = OcoresDriverConfigBuilder::default()
            .bus_khz(400)
            .build()
            .unwrap();
        assert_eq!(config.prescale(), 30);
    }

    #[test]
    fn builder_fills_unset_fields_from_defaults() {
        let config = OcoresDriverConfigBuilder::default()
            .mode(XferMode::Interrupt)
            .pad_time_us(50)
            .build()
            .unwrap();
        assert_eq!(config.mode, XferMode::Interrupt);
        assert_eq!(config.pad_time_us, 50);
        assert_eq!(config.bus_khz, 100);
    }

    #[test]
    fn trace_filter_narrows_by_controller_and_slave() {
        let all = TraceFilter::default();
        assert!(all.pass(3, 0x50));

        let one_bus = TraceFilter {
            controller: Some(2),
            slave: None,
        };
        assert!(one_bus.pass(2, 0x50));
        assert!(!one_bus.pass(3, 0x50));

        let one_slave = TraceFilter {
            controller: None,
            slave: Some(0x50),
        };
        assert!(one_slave.pass(3, 0x50));
        assert!(!one_slave.pass(3, 0x29));
    }
}
