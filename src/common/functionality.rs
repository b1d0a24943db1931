//! Functionality advertisement for bus clients.

use bitflags::bitflags;

bitflags! {
    /// To determine what I2C functionality is present
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct I2cFuncFlags: u32 {
        /// Plain I2C transfers
        const I2C = 0x0000_0001;
        /// Ten-bit addressing
        const TEN_BIT_ADDR = 0x0000_0002;
        /// Messages may suppress the repeated START
        const NOSTART = 0x0000_0010;
        /// SMBus PEC
        const SMBUS_PEC = 0x0000_0008;
        /// SMBus quick command
        const SMBUS_QUICK = 0x0001_0000;
        /// SMBus byte reads and writes
        const SMBUS_BYTE = 0x0006_0000;
        /// SMBus byte-data reads and writes
        const SMBUS_BYTE_DATA = 0x0018_0000;
        /// SMBus word-data reads and writes
        const SMBUS_WORD_DATA = 0x0060_0000;
        /// SMBus block-data reads and writes
        const SMBUS_BLOCK_DATA = 0x0300_0000;
        /// I2C-style block reads and writes
        const SMBUS_I2C_BLOCK = 0x0C00_0000;

        // multi bits
        /// Everything emulatable on top of plain I2C transfers
        const SMBUS_EMUL = Self::SMBUS_QUICK.bits()
            | Self::SMBUS_BYTE.bits()
            | Self::SMBUS_BYTE_DATA.bits()
            | Self::SMBUS_WORD_DATA.bits()
            | Self::SMBUS_BLOCK_DATA.bits()
            | Self::SMBUS_I2C_BLOCK.bits()
            | Self::SMBUS_PEC.bits();
    }
}

/// What this driver advertises upward: standard I2C, no-restart
/// continuations, and SMBus emulation.
pub const OCORES_FUNCTIONALITY: I2cFuncFlags = I2cFuncFlags::I2C
    .union(I2cFuncFlags::NOSTART)
    .union(I2cFuncFlags::SMBUS_EMUL);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertised_functionality_includes_nostart_and_smbus_emulation() {
        assert!(OCORES_FUNCTIONALITY.contains(I2cFuncFlags::I2C));
        assert!(OCORES_FUNCTIONALITY.contains(I2cFuncFlags::NOSTART));
        assert!(OCORES_FUNCTIONALITY.contains(I2cFuncFlags::SMBUS_EMUL));
        assert!(!OCORES_FUNCTIONALITY.contains(I2cFuncFlags::TEN_BIT_ADDR));
    }
}
