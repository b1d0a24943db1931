//! Shared bus types: messages, message flags, special operations.

use bitflags::bitflags;

pub mod functionality;

/// Reserved 7-bit pseudo-address used exclusively for special operations.
///
/// The FPGA extension registers (mux select, controller reset) have no path
/// through a generic bus-client API, so commands to this address are
/// interpreted as special operations instead of real transfers. The address
/// is never assigned to real hardware.
pub const CBUS_ADDR: u16 = 0x01;

// Special operation codes, carried in `buf[0]` of a message addressed to
// CBUS_ADDR; `buf[1]` holds the parameter. These values are shared with
// user space and must not change.

/// Normal message, not a special operation.
pub const SPECIAL_NORMAL: u8 = 0;
/// Write the parameter to the mux-select register.
pub const SPECIAL_MUX_SET: u8 = 1;
/// Pulse the controller reset register.
pub const SPECIAL_RST_CONTROLLER: u8 = 2;
/// Clock a stuck slave at the parameter address back to idle.
pub const SPECIAL_RST_SLAVE: u8 = 3;

bitflags! {
    /// Message flags
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct MsgFlags: u16 {
        /// Read from the slave into the buffer
        const RD = 0x0001;
        /// Suppress the repeated START for a same-address continuation
        const NOSTART = 0x4000;
    }
}

/// One direction-tagged transfer unit within a chain.
///
/// The buffer length is fixed before the transfer starts; for read messages
/// the engine fills the buffer byte by byte.
#[derive(Debug)]
pub struct Message<'a> {
    /// 7-bit target address
    pub addr: u16,
    /// direction and continuation flags
    pub flags: MsgFlags,
    /// data to send, or space to receive into
    pub buf: &'a mut [u8],
}

impl<'a> Message<'a> {
    /// A write message sending `buf` to `addr`.
    pub fn write(addr: u16, buf: &'a mut [u8]) -> Message<'a> {
        Message {
            addr,
            flags: MsgFlags::empty(),
            buf,
        }
    }

    /// A read message filling `buf` from `addr`.
    pub fn read(addr: u16, buf: &'a mut [u8]) -> Message<'a> {
        Message {
            addr,
            flags: MsgFlags::RD,
            buf,
        }
    }

    /// Mark this message as a continuation without a repeated START.
    pub fn with_nostart(mut self) -> Message<'a> {
        self.flags |= MsgFlags::NOSTART;
        self
    }

    /// A special operation carried over the reserved pseudo-address.
    ///
    /// Encodes the opcode and parameter into the caller-provided buffer. A
    /// chain containing a special operation must carry exactly one; the
    /// engine exits the chain after dispatching it.
    pub fn special(op: u8, param: u8, buf: &'a mut [u8; 2]) -> Message<'a> {
        buf[0] = op;
        buf[1] = param;
        Message {
            addr: CBUS_ADDR,
            flags: MsgFlags::empty(),
            buf,
        }
    }

    /// Whether this message reads from the slave.
    pub fn is_read(&self) -> bool {
        self.flags.contains(MsgFlags::RD)
    }

    /// Whether this message targets the reserved pseudo-address.
    pub fn is_special(&self) -> bool {
        self.addr == CBUS_ADDR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_tag_direction() {
        let mut out = [1, 2];
        let mut inp = [0; 4];
        assert!(!Message::write(0x50, &mut out).is_read());
        assert!(Message::read(0x50, &mut inp).is_read());
    }

    #[test]
    fn nostart_is_additive() {
        let mut buf = [0; 2];
        let msg = Message::read(0x29, &mut buf).with_nostart();
        assert!(msg.flags.contains(MsgFlags::RD));
        assert!(msg.flags.contains(MsgFlags::NOSTART));
    }

    #[test]
    fn special_messages_encode_op_and_param() {
        let mut buf = [0u8; 2];
        let msg = Message::special(SPECIAL_MUX_SET, 7, &mut buf);
        assert!(msg.is_special());
        assert_eq!(msg.buf, &[SPECIAL_MUX_SET, 7]);
    }
}
