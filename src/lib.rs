// src/lib.rs

//! DMA driven SPI EEPROM Driver Library
//! DMA 驱动的 SPI EEPROM 驱动库
//!
//! Every instruction sent to the memory is a DMA transaction on a two
//! channel (TX/RX) controller with PING/PONG descriptors. Command header and
//! data phase are chained in hardware, and the busy polling after program,
//! erase and register writes runs from the DMA interrupt, so the CPU is free
//! while the device works.
//! 发送给存储器的每条指令都是一次 DMA 事务。命令头与数据阶段在硬件中链接，
//! 编程、擦除、写寄存器之后的忙状态轮询在 DMA 中断中完成，器件工作期间 CPU 空闲。
//!
//! # Usage / 使用方法
//!
//! 1. Implement [`SpiMaster`] and [`DmaController`] for your chip.
//! 2. Put a [`DmaEngine`] with a [`StatusPoll`] in a `static` and call
//!    [`DmaEngine::on_interrupt`] from the DMA interrupt handler.
//! 3. Create a [`SpiEeprom`] and call `init()`.
//! 4. Start operations and wait on the returned [`Pending`] handle.
//!
//! 1. 为目标芯片实现 [`SpiMaster`] 与 [`DmaController`]。
//! 2. 将带有 [`StatusPoll`] 的 [`DmaEngine`] 放入 `static`，并在 DMA 中断中调用 [`DmaEngine::on_interrupt`]。
//! 3. 创建 [`SpiEeprom`] 实例并调用 `init()`。
//! 4. 启动操作并等待返回的 [`Pending`] 句柄。
//!
//! ```ignore
//! use spi_eeprom_dma::{Config, DmaEngine, JedecId, SpiEeprom, StatusPoll};
//!
//! static ENGINE: DmaEngine<BoardDma, StatusPoll> = DmaEngine::new(BoardDma, StatusPoll::new());
//!
//! #[interrupt]
//! fn DMA() {
//!     ENGINE.on_interrupt();
//! }
//!
//! fn run(spi: BoardSpi) -> Result<(), spi_eeprom_dma::Error> {
//!     let mut eeprom = SpiEeprom::new(spi, &ENGINE, Config::default());
//!     eeprom.init()?;
//!
//!     let mut id = [0u8; 3];
//!     eeprom.read_id(&mut id)?.wait()?;
//!     defmt::info!("{}", JedecId::from(id));
//!
//!     eeprom.ensure_writable()?;
//!     eeprom.write_enable(true)?.wait()?;
//!     eeprom.erase_sector_4k(0)?.wait()?;
//!
//!     let data = [0xA5; 256];
//!     eeprom.write_enable(true)?.wait()?;
//!     eeprom.write(&data, 0)?.wait()?;
//!
//!     let mut back = [0u8; 256];
//!     eeprom.read(&mut back, 0)?.wait()?;
//!     Ok(())
//! }
//! ```
//!
//! # Important Notes / 重要事项
//!
//! * **Buffers / 缓冲区**:
//!   A [`Pending`] handle keeps the buffers borrowed. Dropping it early
//!   blocks until the DMA has released them.
//!   [`Pending`] 句柄持有缓冲区借用，提前析构会阻塞直到 DMA 释放缓冲区。
//! * **Errors / 错误处理**:
//!   After a transfer fault every new operation is refused until
//!   [`SpiEeprom::reset`] is called.
//!   传输故障后，在调用 [`SpiEeprom::reset`] 之前所有新操作都会被拒绝。
//! * **Logging / 日志**:
//!   Enable the `defmt` feature to get driver logs.
//!   启用 `defmt` 特性以输出驱动日志。

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod command;
pub mod dma;
mod eeprom;
mod error;
pub mod hal;
pub mod poll;
pub mod transaction;

pub use command::{AddressWidth, Geometry, JedecId, Opcode, StatusRegister};
pub use dma::{AlwaysDone, Completion, DmaEngine, Link, Packet};
pub use eeprom::{Config, Engine, Pending, SpiEeprom, PROTECT_RETRIES};
pub use error::{Error, ErrorStatus};
pub use hal::{Channel, Descriptor, DmaController, DmaResponse, HwError, SpiMaster, SpiStatus};
pub use poll::{PollState, StatusPoll};
pub use transaction::DataPhase;
