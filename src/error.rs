// src/error.rs

//! Driver errors and the SPI/DMA fault aggregator.
//! 驱动错误类型与 SPI/DMA 故障汇总。

use core::fmt;

use embedded_hal::spi::ErrorKind;

use crate::hal::{DmaResponse, HwError, SpiStatus};

// --- Fault Aggregation / 故障汇总 ---

/// Composite fault value of the SPI master and both DMA channels.
/// SPI 主机与两个 DMA 通道的综合故障值。
///
/// The SPI "master done" bit and the DMA terminal responses (`Done`,
/// `InvalidDescriptor`) are masked out, so a non-zero value always means a
/// fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorStatus {
    spi: u32,
    dma: u8,
}

impl ErrorStatus {
    /// Masks out the non-fault bits. / 屏蔽非故障位。
    pub const fn new(spi_status: u32, dma_responses: u8) -> Self {
        Self {
            spi: spi_status & !SpiStatus::MASTER_DONE,
            dma: dma_responses & !DmaResponse::TERMINAL_MASK,
        }
    }

    /// SPI master fault bits.
    pub const fn spi(&self) -> u32 {
        self.spi
    }

    /// Merged DMA response fault bits of both channels.
    pub const fn dma(&self) -> u8 {
        self.dma
    }

    /// Single value: SPI bits in the low half, DMA bits from bit 16 up.
    pub const fn bits(&self) -> u32 {
        self.spi | (self.dma as u32) << 16
    }

    /// Any fault bit set. / 存在任一故障位。
    pub const fn is_err(&self) -> bool {
        self.bits() != 0
    }
}

// --- Driver Errors / 驱动错误 ---

/// Errors reported by the driver.
/// 驱动上报的错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// SPI or DMA configuration was rejected by the hardware.
    Init(HwError),
    /// Page index is outside the device.
    InvalidPage(u32),
    /// Empty command header.
    InvalidCommand,
    /// Command or data phase does not fit a single DMA descriptor.
    InvalidLength,
    /// SPI or DMA fault observed after the transfer was started.
    Transfer(ErrorStatus),
    /// A bounded wait ran out of polls.
    Timeout,
    /// Block protection could not be cleared within the retry budget.
    Protected,
    /// Previous operation still running, request dropped.
    Busy,
    /// Driver used before a successful `init`.
    Uninitialized,
}

impl Error {
    /// Whether repeating the operation (after [`reset`]) may succeed.
    /// 重试该操作（在 [`reset`] 之后）是否可能成功。
    ///
    /// [`reset`]: crate::SpiEeprom::reset
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer(_) | Self::Timeout | Self::Protected | Self::Busy)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(e) => write!(f, "initialization failed: {}", e),
            Self::InvalidPage(page) => write!(f, "page {} out of range", page),
            Self::InvalidCommand => write!(f, "empty command"),
            Self::InvalidLength => write!(f, "transfer too long"),
            Self::Transfer(status) => write!(f, "transfer fault {:#010x}", status.bits()),
            Self::Timeout => write!(f, "operation timeout"),
            Self::Protected => write!(f, "blocks still write protected"),
            Self::Busy => write!(f, "previous operation still running"),
            Self::Uninitialized => write!(f, "driver not initialized"),
        }
    }
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Transfer(status)
                if status.spi() & (SpiStatus::RX_OVERFLOW | SpiStatus::TX_UNDERFLOW) != 0 =>
            {
                ErrorKind::Overrun
            }
            _ => ErrorKind::Other,
        }
    }
}

impl From<HwError> for Error {
    fn from(e: HwError) -> Self {
        Self::Init(e)
    }
}
