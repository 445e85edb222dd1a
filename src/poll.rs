// src/poll.rs

//! Write-in-progress polling, driven from the DMA interrupt.
//! 由 DMA 中断驱动的写入进行中（WIP）轮询。
//!
//! Program, erase and register writes keep the device busy after their last
//! byte has been clocked in. [`StatusPoll`] keeps a mirror of status
//! register 1 and, as long as its WIP bit is set, re-arms a status read every
//! time the engine reports both channels done. The foreground only sees the
//! operation as done once the device itself reports idle.
//! 编程、擦除、写寄存器在最后一个字节发出后器件仍处于忙状态。[`StatusPoll`]
//! 维护状态寄存器 1 的镜像，只要 WIP 位置位，每次通道完成时都会重新发起状态读取。
//!
//! There is no retry bound here. A device that never clears WIP keeps the
//! operation pending; bounded waits live in [`crate::Pending::wait_for`].

use core::ptr;
use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use crate::command::{Opcode, StatusRegister};
use crate::dma::{Completion, Link, Packet};

static READ_STATUS: [u8; 1] = [Opcode::ReadStatus.byte()];

// --- Poll State / 轮询状态 ---

/// Progress of the current operation as seen by the poller.
/// 轮询器视角下当前操作的进度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PollState {
    /// Nothing submitted since start-up.
    Idle = 0,
    /// Submitted, waiting for the DMA channels.
    AwaitingHardware = 1,
    /// Device reported busy, a status read is in flight.
    PollingBusy = 2,
    /// Device reported idle, operation complete.
    Settled = 3,
}

impl PollState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::AwaitingHardware,
            2 => Self::PollingBusy,
            3 => Self::Settled,
            _ => Self::Idle,
        }
    }
}

// --- Status Poller / 状态轮询器 ---

/// [`Completion`] strategy re-arming status reads until WIP clears.
/// 在 WIP 清除前不断重新发起状态读取的 [`Completion`] 策略。
///
/// The status read is a chained transfer: the response to the opcode byte
/// is dropped into the engine's sink, the single status byte that follows
/// lands in the mirror.
pub struct StatusPoll {
    mirror: AtomicU8,
    state: AtomicU8,
    polls: AtomicU32,
}

impl StatusPoll {
    /// Creates an idle poller. / 创建空闲的轮询器。
    pub const fn new() -> Self {
        Self {
            mirror: AtomicU8::new(0),
            state: AtomicU8::new(PollState::Idle as u8),
            polls: AtomicU32::new(0),
        }
    }

    /// Last status register value seen by the poller.
    /// 轮询器最近看到的状态寄存器值。
    pub fn mirror(&self) -> StatusRegister {
        StatusRegister(self.mirror.load(Ordering::Acquire))
    }

    /// Current progress. / 当前进度。
    pub fn state(&self) -> PollState {
        PollState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Status reads issued for the current operation.
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::Acquire)
    }

    /// Starts tracking a read-only operation.
    /// 开始跟踪只读操作。
    ///
    /// Must only be called while no transfer is in flight.
    pub fn begin_read(&self) {
        self.polls.store(0, Ordering::Release);
        self.state.store(PollState::AwaitingHardware as u8, Ordering::Release);
    }

    /// Starts tracking an operation that makes the device busy. The WIP bit
    /// of the mirror is forced so that the first completion issues a status
    /// read; the real bit is not observable before the command has run.
    /// 开始跟踪会使器件进入忙状态的操作，强制置位镜像的 WIP 位以触发首次状态读取。
    ///
    /// Must only be called while no transfer is in flight.
    pub fn begin_write(&self) {
        let status = self.mirror.load(Ordering::Acquire);
        self.mirror.store(status | StatusRegister::WIP, Ordering::Release);
        self.begin_read();
    }

    fn set_state(&self, state: PollState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for StatusPoll {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion for StatusPoll {
    fn on_settled(&self, link: &dyn Link) -> bool {
        if !self.mirror().is_write_in_progress() {
            self.set_state(PollState::Settled);
            return true;
        }

        // Single writer (interrupt context), no read-modify-write needed.
        let polls = self.polls.load(Ordering::Relaxed).wrapping_add(1);
        self.polls.store(polls, Ordering::Release);
        self.set_state(PollState::PollingBusy);
        trace!("device busy, status poll {}", polls);

        let command = Packet::new(READ_STATUS.as_ptr(), ptr::null_mut(), 1);
        let status = Packet::new(ptr::null(), self.mirror.as_ptr(), 1);
        // SAFETY: both the opcode and the mirror live as long as `self`,
        // which outlives the engine it is installed in.
        unsafe { link.send_chained(command, status) };
        false
    }
}
