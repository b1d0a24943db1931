//! OpenCores I2C register window.
//!
//! Each controller owns eight 32-bit slots at `base + offset * 4`; only the
//! low byte of every slot is meaningful. The command and status registers
//! share slot 4 (write = command, read = status).

use core::ops::Deref;
use core::ptr::NonNull;

use bitflags::bitflags;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::ReadWrite;

/// Width in bytes of one register slot.
pub const REG_IO_WIDTH: usize = 4;
/// Number of register slots per controller.
pub const REG_COUNT: usize = 8;
/// Byte span of one controller's register window.
pub const REG_WINDOW: usize = REG_COUNT * REG_IO_WIDTH;

/// Registers of one controller window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    /// Clock prescale divisor, low byte
    PrescaleLow,
    /// Clock prescale divisor, high byte
    PrescaleHigh,
    /// Control register
    Control,
    /// Transmit/receive data byte
    Data,
    /// Command register (write-only, shares slot 4 with `Status`)
    Command,
    /// Status register (read-only, shares slot 4 with `Command`)
    Status,
    /// Channel select for the attached I2C multiplexer
    MuxSelect,
    /// Controller reset: write 0xD to assert, 0x0 to release
    Reset,
    /// Bus-fabric semaphore (present in the window, unused by the engine)
    Semaphore,
}

impl Reg {
    /// Slot index within the window.
    pub fn offset(self) -> usize {
        match self {
            Reg::PrescaleLow => 0,
            Reg::PrescaleHigh => 1,
            Reg::Control => 2,
            Reg::Data => 3,
            Reg::Command | Reg::Status => 4,
            Reg::MuxSelect => 5,
            Reg::Reset => 6,
            Reg::Semaphore => 7,
        }
    }
}

bitflags! {
    /// Control register bits
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Control: u8 {
        /// enable the controller
        const EN = 0x80;
        /// enable interrupts
        const IEN = 0x40;
    }
}

bitflags! {
    /// Command register bits
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Command: u8 {
        /// generate start condition
        const START = 0x80;
        /// generate stop condition
        const STOP = 0x40;
        /// read from slave
        const READ = 0x20;
        /// write to slave
        const WRITE = 0x10;
        /// do not acknowledge read
        const NOACK = 0x08;
        /// clear pending interrupt
        const IACK = 0x01;
    }
}

bitflags! {
    /// Status register bits
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Status: u8 {
        /// no acknowledge from slave
        const NOACK = 0x80;
        /// bus busy after START
        const BUSY = 0x40;
        /// arbitration lost
        const ARBLOST = 0x20;
        /// transfer in progress
        const TIP = 0x02;
        /// interrupt pending
        const INT = 0x01;
    }
}

/// An all-ones status read signals a fabric-level read failure, not a valid
/// status value.
pub const STAT_ERR: u8 = 0xFF;

/// Assert pattern for the reset register.
pub const RESET_ASSERT: u8 = 0xD;
/// Release pattern for the reset register.
pub const RESET_RELEASE: u8 = 0x0;

// Composite commands; these are the only commands the engine issues.

/// START is issued together with the address byte, hence the WRITE bit.
pub const CMD_START: Command = Command::START.union(Command::WRITE).union(Command::IACK);
/// Terminate the current sequence.
pub const CMD_STOP: Command = Command::STOP.union(Command::IACK);
/// Read one byte and acknowledge it.
pub const CMD_READ: Command = Command::READ.union(Command::IACK);
/// Read the final byte of a message without acknowledging it.
pub const CMD_READ_LAST: Command = Command::READ.union(Command::NOACK).union(Command::IACK);
/// Write one byte.
pub const CMD_WRITE: Command = Command::WRITE.union(Command::IACK);
/// Clear a pending interrupt without touching the bus.
pub const CMD_IACK: Command = Command::IACK;

/// Raw access to one controller's register window.
///
/// The engine drives the hardware exclusively through this trait; the MMIO
/// implementation is [`OcoresRegistersRef`], and tests substitute scripted
/// backends. Accesses are single 32-bit operations and never block.
pub trait RegisterIo: Send + Sync {
    /// Write the low byte of the given register slot.
    fn write(&self, reg: Reg, value: u8);
    /// Read the low byte of the given register slot.
    ///
    /// A [`Status`] read of [`STAT_ERR`] indicates a fabric read failure and
    /// must not be interpreted as a valid status.
    fn read(&self, reg: Reg) -> u8;
}

/// One controller's memory-mapped register window.
#[repr(C)]
pub struct OcoresRegisters {
    prescale_low: ReadWrite<u32>,
    prescale_high: ReadWrite<u32>,
    control: ReadWrite<u32>,
    data: ReadWrite<u32>,
    cmd_stat: ReadWrite<u32>,
    mux_select: ReadWrite<u32>,
    reset: ReadWrite<u32>,
    semaphore: ReadWrite<u32>,
}

/// OcoresRegisters pointer wrapper
pub struct OcoresRegistersRef {
    ptr: NonNull<OcoresRegisters>,
}

impl OcoresRegistersRef {
    /// Create a register window reference from the controller's base address.
    ///
    /// # Safety
    ///
    /// - `base` must be aligned, non-null, and dereferencable as the
    ///   eight-slot register window.
    /// - The mapping must remain valid for the lifetime of the value.
    pub unsafe fn new(base: *mut u8) -> OcoresRegistersRef {
        OcoresRegistersRef {
            ptr: NonNull::new(base).expect("base is null").cast(),
        }
    }
}

impl Deref for OcoresRegistersRef {
    type Target = OcoresRegisters;

    fn deref(&self) -> &OcoresRegisters {
        // SAFETY: `ptr` is aligned and dereferencable for the program
        // duration as promised by the caller of `OcoresRegistersRef::new`.
        unsafe { self.ptr.as_ref() }
    }
}

// A window is only ever driven under its controller's transaction lock.
unsafe impl Send for OcoresRegistersRef {}
unsafe impl Sync for OcoresRegistersRef {}

impl OcoresRegisters {
    fn slot(&self, reg: Reg) -> &ReadWrite<u32> {
        match reg {
            Reg::PrescaleLow => &self.prescale_low,
            Reg::PrescaleHigh => &self.prescale_high,
            Reg::Control => &self.control,
            Reg::Data => &self.data,
            Reg::Command | Reg::Status => &self.cmd_stat,
            Reg::MuxSelect => &self.mux_select,
            Reg::Reset => &self.reset,
            Reg::Semaphore => &self.semaphore,
        }
    }
}

impl RegisterIo for OcoresRegistersRef {
    fn write(&self, reg: Reg, value: u8) {
        self.slot(reg).set(value as u32);
    }

    fn read(&self, reg: Reg) -> u8 {
        self.slot(reg).get() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets_match_the_window_layout() {
        assert_eq!(Reg::PrescaleLow.offset(), 0);
        assert_eq!(Reg::PrescaleHigh.offset(), 1);
        assert_eq!(Reg::Control.offset(), 2);
        assert_eq!(Reg::Data.offset(), 3);
        assert_eq!(Reg::Command.offset(), 4);
        assert_eq!(Reg::Status.offset(), 4);
        assert_eq!(Reg::MuxSelect.offset(), 5);
        assert_eq!(Reg::Reset.offset(), 6);
        assert_eq!(Reg::Semaphore.offset(), 7);
        assert_eq!(REG_WINDOW, 32);
    }

    #[test]
    fn composite_commands_encode_as_on_the_wire() {
        assert_eq!(CMD_START.bits(), 0x91);
        assert_eq!(CMD_STOP.bits(), 0x41);
        assert_eq!(CMD_READ.bits(), 0x21);
        assert_eq!(CMD_READ_LAST.bits(), 0x29);
        assert_eq!(CMD_WRITE.bits(), 0x11);
        assert_eq!(CMD_IACK.bits(), 0x01);
    }

    #[test]
    fn status_sentinel_covers_every_status_bit() {
        assert_eq!(Status::all().bits() | STAT_ERR, STAT_ERR);
    }

    #[test]
    fn mmio_round_trip_through_an_in_memory_window() {
        let mut window = [0u32; REG_COUNT];
        // SAFETY: the array outlives the reference and has the window layout.
        let regs = unsafe { OcoresRegistersRef::new(window.as_mut_ptr().cast()) };
        regs.write(Reg::MuxSelect, 0x5A);
        assert_eq!(regs.read(Reg::MuxSelect), 0x5A);
        regs.write(Reg::Data, 0xA7);
        assert_eq!(regs.read(Reg::Data), 0xA7);
        assert_eq!(regs.read(Reg::Control), 0);
    }
}
