// src/transaction.rs

//! Transaction orchestration: one command header plus an optional data phase.
//! 事务编排：一个命令头加可选的数据阶段。

use core::ptr;

use crate::command::is_read_only;
use crate::dma::{Link, Packet};
use crate::error::Error;
use crate::poll::StatusPoll;

// --- Data Phase / 数据阶段 ---

/// Data phase following the command header.
/// 命令头之后的数据阶段。
#[derive(Debug)]
pub enum DataPhase<'a> {
    /// Command only. / 仅命令。
    None,
    /// Bytes clocked out after the header, response discarded.
    Write(&'a [u8]),
    /// Fill bytes clocked out after the header, response stored.
    Read(&'a mut [u8]),
}

impl DataPhase<'_> {
    /// Bytes moved after the header. / 命令头之后传输的字节数。
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Write(data) => data.len(),
            Self::Read(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn packet(&mut self, len: u16) -> Packet {
        match self {
            Self::None => Packet::new(ptr::null(), ptr::null_mut(), 0),
            Self::Write(data) => Packet::new(data.as_ptr(), ptr::null_mut(), len),
            Self::Read(buf) => Packet::new(ptr::null(), buf.as_mut_ptr(), len),
        }
    }
}

// --- Submission / 提交 ---

/// Starts a transaction and returns as soon as the DMA is armed.
/// 启动一次事务，DMA 启动后立即返回。
///
/// Any opcode that is not a read marks the device busy in `poll` before the
/// transfer starts, so that completion waits for a status read reporting
/// idle. An empty data phase sends the header alone, otherwise the header
/// and the data are chained into one chip select frame.
///
/// `Ok` only means the transfer was handed to the hardware. Completion and
/// faults are observed through the engine.
/// `Ok` 仅表示传输已交给硬件，完成与故障需通过引擎观察。
///
/// # Safety
///
/// `command` and the data phase buffer must stay valid and untouched until
/// the engine reports the transfer done or faulted.
pub unsafe fn submit(
    link: &dyn Link,
    poll: &StatusPoll,
    command: &[u8],
    mut data: DataPhase<'_>,
) -> Result<(), Error> {
    let Some(&opcode) = command.first() else {
        return Err(Error::InvalidCommand);
    };
    let command_len = u16::try_from(command.len()).map_err(|_| Error::InvalidLength)?;
    let data_len = u16::try_from(data.len()).map_err(|_| Error::InvalidLength)?;

    if is_read_only(opcode) {
        poll.begin_read();
    } else {
        poll.begin_write();
    }

    let header = Packet::new(command.as_ptr(), ptr::null_mut(), command_len);
    if data_len == 0 {
        // SAFETY: caller keeps `command` alive until completion.
        unsafe { link.send_single(header) };
    } else {
        let payload = data.packet(data_len);
        // SAFETY: caller keeps `command` and the data buffer alive until completion.
        unsafe { link.send_chained(header, payload) };
    }
    Ok(())
}
