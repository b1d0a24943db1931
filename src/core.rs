//! Message-chain transfer engine for one controller.
//!
//! The engine advances a chain of [`Message`]s through the states below,
//! issuing one composite command at a time and yielding to the controller's
//! wait strategy whenever a command is left in flight on the wire.

use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::common::{
    Message, MsgFlags, CBUS_ADDR, SPECIAL_MUX_SET, SPECIAL_RST_CONTROLLER, SPECIAL_RST_SLAVE,
};
use crate::error::Error;
use crate::registers::{
    Command, Reg, RegisterIo, Status, CMD_IACK, CMD_READ, CMD_READ_LAST, CMD_START, CMD_STOP,
    CMD_WRITE, RESET_ASSERT, RESET_RELEASE, STAT_ERR,
};
use crate::TraceFilter;

/// Hold time for the controller reset pulse.
const RESET_HOLD_US: u64 = 500;

/// Transfer states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// ready to start a new message
    PreStart,
    /// ready to send a START command
    Start,
    /// ready to transfer data
    Data,
    /// READ command in progress
    Read,
    /// WRITE command in progress
    Write,
    /// ready to send STOP
    Stop,
    /// message sequence complete
    Done,
    /// same as Done, but without IACK
    Exit,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::PreStart => "PRE_START",
            State::Start => "START",
            State::Data => "DATA",
            State::Read => "READ",
            State::Write => "WRITE",
            State::Stop => "STOP",
            State::Done => "DONE",
            State::Exit => "EXIT",
        }
    }
}

/// One in-flight message chain on one controller.
///
/// Borrows the controller's registers and the caller's messages for the
/// duration of a single `transfer` call; the controller's transaction lock
/// guarantees there is exactly one writer of this state.
pub(crate) struct Transfer<'a, 'b, R: RegisterIo> {
    regs: &'a R,
    filter: &'a TraceFilter,
    controller: usize,
    msgs: &'a mut [Message<'b>],
    /// current message in the chain
    cur_msg: usize,
    /// current byte within the message
    cur_byte: usize,
    /// currently open slave address, 0 when no START has been sent
    cur_slave: u16,
    /// first error recorded for the chain
    pub(crate) error: Option<Error>,
    state: State,
}

impl<'a, 'b, R: RegisterIo> Transfer<'a, 'b, R> {
    pub(crate) fn new(
        regs: &'a R,
        filter: &'a TraceFilter,
        controller: usize,
        msgs: &'a mut [Message<'b>],
    ) -> Transfer<'a, 'b, R> {
        Transfer {
            regs,
            filter,
            controller,
            msgs,
            cur_msg: 0,
            cur_byte: 0,
            cur_slave: 0,
            error: None,
            state: State::PreStart,
        }
    }

    /// Check the trace filter for the current controller and slave.
    pub(crate) fn traced(&self) -> bool {
        self.filter.pass(self.controller, self.cur_slave)
    }

    /// Run the state machine until a command is left in flight.
    ///
    /// Returns `true` when the caller must wait for transfer-in-progress to
    /// deassert, `false` once a terminal state ends the chain. A pending
    /// timeout or protocol error forces the STOP path first so the hardware
    /// is never abandoned mid-command.
    pub(crate) fn process(&mut self) -> bool {
        if matches!(
            self.error,
            Some(Error::Timeout) | Some(Error::ArbitrationLost)
        ) {
            self.state = State::Stop;
            self.stop();
            self.done();
            return false;
        }

        loop {
            let stat = self.regs.read(Reg::Status);
            if Status::from_bits_truncate(stat).contains(Status::TIP) {
                return true;
            }
            if self.traced() {
                trace!(
                    "i2c{}: state {}, status {:#04X}",
                    self.controller,
                    self.state.name(),
                    stat
                );
            }

            match self.state {
                State::PreStart => self.pre_start(),
                State::Start => self.start(),
                State::Data => self.data(),
                State::Read => self.read(),
                State::Write => self.write(),
                State::Stop => self.stop(),
                State::Done => {
                    self.done();
                    return false;
                }
                State::Exit => return false,
            }
        }
    }

    /// Send a composite command, data byte first.
    fn cmd(&self, cmd: Command, data: u8) {
        if self.traced() {
            trace!(
                "i2c{}: send command {:#04X} ({:?}) with data {:#04X}",
                self.controller,
                cmd.bits(),
                cmd,
                data
            );
        }
        self.regs.write(Reg::Data, data);
        self.regs.write(Reg::Command, cmd.bits());
    }

    /// Check if the bus is busy. An all-ones status is a fabric read error;
    /// it is logged here and surfaces through the busy bit it carries.
    fn bus_busy(&self) -> bool {
        let stat = self.regs.read(Reg::Status);
        if stat == STAT_ERR {
            debug!(
                "i2c{}: fabric read error on status, slave {:#04X}",
                self.controller, self.cur_slave
            );
        }
        Status::from_bits_truncate(stat).contains(Status::BUSY)
    }

    /// Summarize the current message at debug level.
    fn trace_msg(&self, read_data_valid: bool) {
        let msg = &self.msgs[self.cur_msg];
        let dump = if !msg.is_read() || read_data_valid {
            hex_prefix(msg.buf, 4)
        } else {
            String::new()
        };
        debug!(
            "i2c{}: msg {}: addr {:#04X} {} {} bytes{}: {}",
            self.controller,
            self.cur_msg,
            msg.addr,
            if msg.is_read() { "READ" } else { "WRITE" },
            msg.buf.len(),
            if msg.flags.contains(MsgFlags::NOSTART) {
                " with NOSTART"
            } else {
                ""
            },
            dump
        );
    }

    /// Advance to the next message in the chain.
    fn next_msg(&mut self) {
        self.cur_byte = 0;
        self.cur_msg += 1;

        if self.cur_msg < self.msgs.len() {
            // more messages left, prepare to process the next one
            self.state = State::PreStart;
        } else if self.cur_slave != 0 {
            // no messages left and an address is open, send a STOP
            self.state = State::Stop;
        } else {
            // no messages left and no START was ever sent
            self.state = State::Done;
        }
    }

    /// Handle a message that is not a real data transfer. The operation is
    /// in the first byte of the message and its parameter in the second.
    fn special_op(&mut self) {
        if self.msgs[self.cur_msg].buf.len() < 2 {
            debug!(
                "i2c{}: special operation shorter than two bytes",
                self.controller
            );
            self.error = Some(Error::InvalidOperation);
            return;
        }
        let op = self.msgs[self.cur_msg].buf[0];
        let param = self.msgs[self.cur_msg].buf[1];

        match op {
            SPECIAL_MUX_SET => {
                debug!("i2c{}: msg {}: MUX SELECT {}", self.controller, self.cur_msg, param);
                self.regs.write(Reg::MuxSelect, param);
            }
            SPECIAL_RST_CONTROLLER => {
                debug!("i2c{}: msg {}: RESET CONTROLLER", self.controller, self.cur_msg);

                // Assert the reset register, hold it, then release it
                self.regs.write(Reg::Reset, RESET_ASSERT);
                thread::sleep(Duration::from_micros(RESET_HOLD_US));
                self.regs.write(Reg::Reset, RESET_RELEASE);
            }
            SPECIAL_RST_SLAVE => {
                debug!("i2c{}: msg {}: RESET SLAVE {:#04X}", self.controller, self.cur_msg, param);

                // The slave is assumed unresponsive, so bypass the state
                // machine and issue raw commands.
                self.cmd(CMD_START, param << 1);

                // Writing 0xFF holds the data line high for nine clock
                // pulses; the stuck slave is not expected to acknowledge.
                self.cmd(CMD_WRITE, 0xFF);

                // STOP is part of the recovery
                self.cmd(CMD_STOP, 0);
            }
            _ => {
                debug!(
                    "i2c{}: msg {}: UNKNOWN OPERATION {} {}",
                    self.controller, self.cur_msg, op, param
                );
                self.error = Some(Error::InvalidOperation);
            }
        }
    }

    /// PRE_START: dispatch special operations, or else start a new message.
    fn pre_start(&mut self) {
        if self.msgs[self.cur_msg].addr == CBUS_ADDR {
            self.special_op();

            // Exit immediately without processing any remaining messages or
            // sending an IACK; the reserved path bypasses bus protocol.
            self.state = State::Exit;
        } else if self.cur_slave != 0 && self.cur_slave != self.msgs[self.cur_msg].addr {
            // A different address is open; terminate its sequence first.
            self.state = State::Stop;
        } else {
            self.state = State::Start;
        }
    }

    /// START: open the slave address for the current message.
    fn start(&mut self) {
        let old_addr = self.cur_slave;
        let addr = self.msgs[self.cur_msg].addr;
        let is_read = self.msgs[self.cur_msg].is_read();
        let nostart = self.msgs[self.cur_msg].flags.contains(MsgFlags::NOSTART);
        self.cur_slave = addr;

        if self.traced() && !is_read {
            self.trace_msg(false);
        }

        // Send a START for the first message, for an address change, or
        // whenever the device expects repeated STARTs between messages.
        if self.cur_msg == 0 || addr != old_addr || !nostart {
            if self.cur_msg == 0 && self.bus_busy() {
                debug!("i2c{}: bus is busy, slave {:#04X}", self.controller, addr);
                self.error = Some(Error::BusBusy);
                self.state = State::Done;
            } else {
                let data = ((addr << 1) as u8) | u8::from(is_read);
                self.cmd(CMD_START, data);
            }
        }

        if self.error.is_none() {
            self.state = State::Data;
        }
    }

    /// DATA: classify status, then issue the next READ or WRITE.
    fn data(&mut self) {
        let stat = Status::from_bits_truncate(self.regs.read(Reg::Status));
        let len = self.msgs[self.cur_msg].buf.len();
        let is_read = self.msgs[self.cur_msg].is_read();

        if stat.contains(Status::ARBLOST) {
            // Another master won the bus; abort the whole chain.
            debug!(
                "i2c{}: arbitration lost, status {:#04X}, slave {:#04X}",
                self.controller,
                stat.bits(),
                self.cur_slave
            );
            self.error = Some(Error::ArbitrationLost);
            self.state = State::Stop;
        } else if self.cur_byte == 0 && stat.contains(Status::NOACK) {
            // The slave did not acknowledge the START command.
            debug!(
                "i2c{}: no acknowledge on START, status {:#04X}, slave {:#04X}",
                self.controller,
                stat.bits(),
                self.cur_slave
            );
            self.error = Some(Error::NoAcknowledge);
            self.state = State::Stop;
        } else if self.cur_byte >= len {
            // No data left for this message.
            if self.traced() && is_read {
                self.trace_msg(true);
            }
            self.next_msg();
        } else if is_read {
            let cmd = if self.cur_byte < len - 1 {
                CMD_READ
            } else {
                CMD_READ_LAST
            };
            self.cmd(cmd, 0);
            self.state = State::Read;
        } else {
            let byte = self.msgs[self.cur_msg].buf[self.cur_byte];
            self.cmd(CMD_WRITE, byte);
            self.state = State::Write;
        }
    }

    /// READ: capture the byte the controller received.
    fn read(&mut self) {
        let data = self.regs.read(Reg::Data);
        if self.traced() {
            trace!("i2c{}: read data {:#04X}", self.controller, data);
        }
        self.msgs[self.cur_msg].buf[self.cur_byte] = data;
        self.cur_byte += 1;
        self.state = State::Data;
    }

    /// WRITE: check acknowledgement of the byte just written.
    fn write(&mut self) {
        let stat = Status::from_bits_truncate(self.regs.read(Reg::Status));
        if stat.contains(Status::NOACK) {
            debug!(
                "i2c{}: no acknowledge on WRITE, status {:#04X}, slave {:#04X}",
                self.controller,
                stat.bits(),
                self.cur_slave
            );
            self.error = Some(Error::NoAcknowledge);
            self.state = State::Stop;
        } else {
            self.cur_byte += 1;
            self.state = State::Data;
        }
    }

    /// STOP: terminate the open sequence.
    fn stop(&mut self) {
        self.cmd(CMD_STOP, 0);

        // With no error and messages remaining this STOP separated two
        // addresses; otherwise it terminated the chain.
        if self.error.is_none() && self.cur_msg < self.msgs.len() {
            self.state = State::Start;
        } else {
            self.state = State::Done;
        }
    }

    /// DONE: acknowledge any outstanding interrupt.
    fn done(&mut self) {
        self.cmd(CMD_IACK, 0);
        self.state = State::Done;
    }
}

/// Format up to `limit` bytes of a buffer in hex for tracing.
fn hex_prefix(buf: &[u8], limit: usize) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    for byte in buf.iter().take(limit) {
        let _ = write!(out, "{byte:02X} ");
    }
    if buf.len() > limit {
        out.push_str("...");
    }
    out
}
