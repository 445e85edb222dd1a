// src/eeprom.rs

//! Serial EEPROM driver / 串行 EEPROM 驱动
//!
//! Every instruction is a DMA transaction: the command header and the data
//! phase are chained into one chip select frame, and write-type
//! instructions are followed by status polling from the DMA interrupt until
//! the device reports idle.
//! 每条指令都是一次 DMA 事务：命令头与数据阶段链接在同一个片选帧内，
//! 写类指令完成后由 DMA 中断自动轮询状态寄存器，直到器件空闲。
//!
//! Operations return a [`Pending`] handle right after the transfer was
//! started. The handle borrows the driver and the caller's buffers until the
//! hardware is finished with them.
//! 操作在传输启动后立即返回 [`Pending`] 句柄，该句柄在硬件使用期间借用驱动与缓冲区。
//!
//! **Hardware Requirements / 硬件要求**:
//! `/WP` and `/HOLD` must be pulled high for standard SPI mode.
//! 标准 SPI 模式下 `/WP` 与 `/HOLD` 引脚必须拉高。

use core::future::poll_fn;
use core::marker::PhantomData;
use core::task::Poll;

use crate::command::{AddressWidth, CommandBuffer, Encoder, Geometry, Opcode, StatusRegister};
use crate::dma::DmaEngine;
use crate::error::{Error, ErrorStatus};
use crate::hal::{DmaController, SpiMaster};
use crate::poll::{PollState, StatusPoll};
use crate::transaction::{self, DataPhase};

/// Number of write-protect clearing attempts made by
/// [`SpiEeprom::ensure_writable`] / 清除写保护的默认尝试次数
pub const PROTECT_RETRIES: u8 = 3;

/// Transfer engine type used by the driver / 驱动使用的传输引擎类型
pub type Engine<D> = DmaEngine<D, StatusPoll>;

/// Driver configuration / 驱动配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Address bytes after addressed opcodes / 地址字节数
    pub address_width: AddressWidth,
    /// Page size and page count / 页大小与页数
    pub geometry: Geometry,
    /// Attempts made by `ensure_writable` / 清除写保护的尝试次数
    pub protect_retries: u8,
    /// Poll budget of [`Pending::wait`], `None` waits forever.
    /// [`Pending::wait`] 的轮询上限，`None` 表示无限等待。
    pub poll_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address_width: AddressWidth::Bits24,
            geometry: Geometry::default(),
            protect_retries: PROTECT_RETRIES,
            poll_limit: None,
        }
    }
}

// --- Driver Struct / 驱动结构体 ---
/// SPI EEPROM driver instance / SPI EEPROM 驱动实例
///
/// `engine` must be the same object whose [`DmaEngine::on_interrupt`] is
/// called from the DMA interrupt handler, typically a `static`.
/// `engine` 必须是在 DMA 中断处理函数中调用 [`DmaEngine::on_interrupt`] 的同一个对象，通常为 `static`。
pub struct SpiEeprom<'e, S, D> {
    spi: S,
    engine: &'e Engine<D>,
    encoder: Encoder,
    cmd: CommandBuffer,
    config: Config,
}

// --- Driver Implementation / 驱动实现 ---
impl<'e, S: SpiMaster, D: DmaController> SpiEeprom<'e, S, D> {
    /// Creates a new driver instance.
    /// 创建一个新的驱动实例。
    ///
    /// # Arguments / 参数
    /// * `spi`: SPI master owning the FIFOs. / 持有 FIFO 的 SPI 主机。
    /// * `engine`: Shared DMA engine. / 共享的 DMA 引擎。
    /// * `config`: Device configuration. / 器件配置。
    pub fn new(spi: S, engine: &'e Engine<D>, config: Config) -> Self {
        Self {
            spi,
            engine,
            encoder: Encoder::new(config.address_width, config.geometry),
            cmd: CommandBuffer::new(),
            config,
        }
    }

    /// Configures and enables the SPI master, then the DMA engine.
    /// 配置并使能 SPI 主机，然后初始化 DMA 引擎。
    pub fn init(&mut self) -> Result<(), Error> {
        if let Err(e) = self.spi.init() {
            error!("spi master init failed: {:?}", e);
            return Err(Error::Init(e));
        }
        if let Err(e) = self.engine.init(self.spi.tx_fifo(), self.spi.rx_fifo()) {
            error!("dma init failed: {:?}", e);
            return Err(Error::Init(e));
        }
        info!(
            "spi eeprom ready: {} pages of {} bytes",
            self.config.geometry.page_count,
            self.config.geometry.page_size
        );
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared DMA engine / 共享的 DMA 引擎
    pub fn engine(&self) -> &'e Engine<D> {
        self.engine
    }

    /// The SPI master / SPI 主机
    pub fn spi(&self) -> &S {
        &self.spi
    }

    /// Releases the SPI master / 释放 SPI 主机
    pub fn release(self) -> S {
        self.spi
    }

    // --- Register Access / 寄存器访问 ---

    /// Reads the identification bytes (JEDEC ID, see [`crate::JedecId`]).
    /// 读取器件标识（JEDEC ID）。
    pub fn read_id<'a>(&'a mut self, id: &'a mut [u8]) -> Result<Pending<'a, 'e, S, D>, Error> {
        self.ready()?;
        self.encoder.opcode(&mut self.cmd, Opcode::ReadId)?;
        self.start(DataPhase::Read(id))
    }

    /// Reads status register 1.
    /// 读取状态寄存器1。
    pub fn read_status<'a>(&'a mut self, status: &'a mut u8) -> Result<Pending<'a, 'e, S, D>, Error> {
        self.read_register(Opcode::ReadStatus, status)
    }

    /// Reads status register 2.
    /// 读取状态寄存器2。
    pub fn read_status_2<'a>(&'a mut self, status: &'a mut u8) -> Result<Pending<'a, 'e, S, D>, Error> {
        self.read_register(Opcode::ReadStatus2, status)
    }

    /// Reads the configuration register.
    /// 读取配置寄存器。
    pub fn read_config<'a>(&'a mut self, config: &'a mut u8) -> Result<Pending<'a, 'e, S, D>, Error> {
        self.read_register(Opcode::ReadConfig, config)
    }

    /// Writes the status/configuration register.
    /// 写状态/配置寄存器。
    ///
    /// With `protect_all` set, SRWD and all block protect bits are set, which
    /// prepares the device for hardware protection mode. Otherwise every
    /// protection bit is cleared. The `/WP` pin is not handled here.
    /// `protect_all` 为真时置位 SRWD 与全部块保护位（为硬件保护模式做准备），否则清除全部保护位。
    pub fn write_status(&mut self, protect_all: bool) -> Result<Pending<'_, 'e, S, D>, Error> {
        self.ready()?;
        self.encoder.with_argument(
            &mut self.cmd,
            Opcode::WriteStatus,
            StatusRegister::protection(protect_all),
        )?;
        self.start(DataPhase::None)
    }

    /// Sets (`true`) or clears (`false`) the write enable latch. The latch
    /// must be set before every program, erase and register write and clears
    /// itself once they complete.
    /// 置位或清除写使能锁存器。每次编程、擦除、写寄存器前必须置位，操作完成后自动清除。
    pub fn write_enable(&mut self, enable: bool) -> Result<Pending<'_, 'e, S, D>, Error> {
        self.ready()?;
        let op = if enable { Opcode::WriteEnable } else { Opcode::WriteDisable };
        self.encoder.opcode(&mut self.cmd, op)?;
        self.start(DataPhase::None)
    }

    // --- Bulk Data / 数据读写 ---

    /// Reads up to one page starting at `page`.
    /// 从 `page` 页起读取至多一页数据。
    ///
    /// Only the first `page_size` bytes of `buf` are filled. Reads never
    /// cross a page; split larger reads into per-page calls.
    /// 只填充 `buf` 的前 `page_size` 字节，读取不会跨页。
    pub fn read<'a>(&'a mut self, buf: &'a mut [u8], page: u32) -> Result<Pending<'a, 'e, S, D>, Error> {
        self.ready()?;
        self.encoder.addressed(&mut self.cmd, Opcode::Read, page)?;
        let len = self.config.geometry.clamp(buf.len());
        self.start(DataPhase::Read(&mut buf[..len]))
    }

    /// Programs up to one page starting at `page` (Page Program).
    /// 从 `page` 页起编程至多一页数据（页编程）。
    ///
    /// **Note**: the target area must be erased and the write enable latch set.
    /// **注意**: 目标区域必须已擦除，并已置位写使能。
    pub fn write<'a>(&'a mut self, data: &'a [u8], page: u32) -> Result<Pending<'a, 'e, S, D>, Error> {
        self.ready()?;
        self.encoder.addressed(&mut self.cmd, Opcode::PageProgram, page)?;
        let len = self.config.geometry.clamp(data.len());
        self.start(DataPhase::Write(&data[..len]))
    }

    // --- Erase / 擦除 ---

    /// Erases the 4KB sector containing `page`.
    /// 擦除 `page` 所在的 4KB 扇区。
    pub fn erase_sector_4k(&mut self, page: u32) -> Result<Pending<'_, 'e, S, D>, Error> {
        self.erase(Opcode::SectorErase4k, page)
    }

    /// Erases the 32KB block containing `page`.
    /// 擦除 `page` 所在的 32KB 块。
    pub fn erase_block_32k(&mut self, page: u32) -> Result<Pending<'_, 'e, S, D>, Error> {
        self.erase(Opcode::BlockErase32k, page)
    }

    /// Erases the 64KB block containing `page`.
    /// 擦除 `page` 所在的 64KB 块。
    pub fn erase_block_64k(&mut self, page: u32) -> Result<Pending<'_, 'e, S, D>, Error> {
        self.erase(Opcode::BlockErase64k, page)
    }

    /// Erases the whole device. Takes seconds on large parts.
    /// 擦除整片，大容量器件需要数秒。
    pub fn erase_chip(&mut self) -> Result<Pending<'_, 'e, S, D>, Error> {
        self.ready()?;
        self.encoder.opcode(&mut self.cmd, Opcode::ChipErase)?;
        self.start(DataPhase::None)
    }

    /// Sends an arbitrary command header with an optional data phase.
    /// 发送任意命令头及可选数据阶段。
    pub fn transaction<'a>(
        &'a mut self,
        command: &'a [u8],
        data: DataPhase<'a>,
    ) -> Result<Pending<'a, 'e, S, D>, Error> {
        self.ready()?;
        // SAFETY: the returned handle borrows `command`, `data` and `self`
        // until the hardware has released them.
        unsafe { transaction::submit(self.engine, self.engine.completion(), command, data)? };
        Ok(Pending::new(self))
    }

    // --- Status / 状态 ---

    /// Last operation fully complete, including the device's write cycle.
    /// 上一次操作已完全结束（包括器件内部写周期）。
    pub fn is_done(&self) -> bool {
        self.engine.is_done() && self.spi.is_tx_complete()
    }

    /// A DMA channel reported a fault / DMA 通道报告故障
    pub fn has_error(&self) -> bool {
        self.engine.has_error()
    }

    /// Aggregated SPI and DMA fault bits / 汇总的 SPI 与 DMA 故障位
    pub fn error(&self) -> ErrorStatus {
        ErrorStatus::new(self.spi.master_status(), self.engine.dma_fault())
    }

    /// Flushes the SPI FIFOs and waits for the DMA to reach a terminal state,
    /// then clears all flags. The only way out of an error.
    /// 清空 SPI FIFO，等待 DMA 进入终止状态后清除全部标志。这是出错后唯一的恢复途径。
    pub fn reset(&mut self) {
        self.spi.clear_fifos();
        self.engine.reset();
    }

    /// Clears the block protection bits, verifying with a status read, up to
    /// `protect_retries` times. Returns the final status register.
    /// 清除块保护位并回读校验，最多尝试 `protect_retries` 次，返回最终状态寄存器。
    pub fn ensure_writable(&mut self) -> Result<StatusRegister, Error> {
        let attempts = self.config.protect_retries.max(1);
        for attempt in 1..=attempts {
            self.write_enable(true)?.wait()?;
            self.write_status(false)?.wait()?;

            let mut raw = 0u8;
            self.read_status(&mut raw)?.wait()?;
            let status = StatusRegister(raw);
            if !status.is_protected() {
                debug!("write protection cleared after {} attempt(s)", attempt);
                return Ok(status);
            }
            warn!("blocks still protected (status {=u8:#x}), attempt {}", raw, attempt);
        }
        error!("write protection could not be cleared");
        Err(Error::Protected)
    }

    // --- Private Helper Functions / 私有辅助函数 ---

    fn ready(&self) -> Result<(), Error> {
        if !self.engine.is_ready() {
            return Err(Error::Uninitialized);
        }
        if self.engine.has_error() {
            return Err(Error::Transfer(self.error()));
        }
        if !self.engine.is_done() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    fn read_register<'a>(&'a mut self, op: Opcode, value: &'a mut u8) -> Result<Pending<'a, 'e, S, D>, Error> {
        self.ready()?;
        self.encoder.opcode(&mut self.cmd, op)?;
        self.start(DataPhase::Read(core::slice::from_mut(value)))
    }

    fn erase(&mut self, op: Opcode, page: u32) -> Result<Pending<'_, 'e, S, D>, Error> {
        self.ready()?;
        self.encoder.addressed(&mut self.cmd, op, page)?;
        self.start(DataPhase::None)
    }

    fn start<'a>(&'a mut self, data: DataPhase<'a>) -> Result<Pending<'a, 'e, S, D>, Error> {
        trace!("submit {=[u8]:x}, {} data bytes", self.cmd.as_slice(), data.len());
        // SAFETY: the command buffer lives in `self` and the data buffer is
        // borrowed for 'a; the returned handle keeps both borrowed until the
        // hardware has released them.
        unsafe { transaction::submit(self.engine, self.engine.completion(), &self.cmd, data)? };
        Ok(Pending::new(self))
    }
}

/// Handle of a started operation / 已启动操作的句柄
///
/// Keeps the driver and the operation's buffers borrowed. Dropping it blocks
/// until the DMA no longer touches the buffers (the device may still be busy
/// with its internal write cycle afterwards, see [`SpiEeprom::is_done`]).
/// 持有驱动与缓冲区的借用。析构时会阻塞直到 DMA 不再访问缓冲区。
#[must_use = "the transfer is still running; wait for it before reusing the driver"]
pub struct Pending<'a, 'e, S: SpiMaster, D: DmaController> {
    eeprom: &'a SpiEeprom<'e, S, D>,
    _buffers: PhantomData<&'a mut [u8]>,
}

impl<'a, 'e, S: SpiMaster, D: DmaController> Pending<'a, 'e, S, D> {
    fn new(eeprom: &'a SpiEeprom<'e, S, D>) -> Self {
        Self {
            eeprom,
            _buffers: PhantomData,
        }
    }

    /// See [`SpiEeprom::is_done`]. / 参见 [`SpiEeprom::is_done`]。
    pub fn is_done(&self) -> bool {
        self.eeprom.is_done()
    }

    pub fn has_error(&self) -> bool {
        self.eeprom.has_error()
    }

    /// Non-blocking completion check / 非阻塞完成检查
    pub fn poll(&self) -> nb::Result<(), Error> {
        if self.eeprom.has_error() {
            return Err(nb::Error::Other(Error::Transfer(self.eeprom.error())));
        }
        if !self.eeprom.is_done() {
            return Err(nb::Error::WouldBlock);
        }
        let status = self.eeprom.error();
        if status.is_err() {
            return Err(nb::Error::Other(Error::Transfer(status)));
        }
        Ok(())
    }

    /// Busy-waits for completion, bounded by [`Config::poll_limit`] if set.
    /// 忙等待操作完成，若设置了 [`Config::poll_limit`] 则受其限制。
    ///
    /// On [`Error::Timeout`] the operation is still running and the handle
    /// stays with the caller, who can wait again or keep it until the
    /// hardware recovers. Dropping an unfinished handle blocks like any drop.
    /// 超时返回 [`Error::Timeout`] 时操作仍在进行，句柄仍由调用者持有，
    /// 可以再次等待；析构未完成的句柄同样会阻塞。
    pub fn wait(&self) -> Result<(), Error> {
        match self.eeprom.config.poll_limit {
            Some(limit) => self.wait_for(limit),
            None => nb::block!(self.poll()),
        }
    }

    /// Busy-waits at most `max_polls` checks, then gives up with
    /// [`Error::Timeout`] and keeps the handle.
    /// 最多检查 `max_polls` 次，超时返回 [`Error::Timeout`] 且保留句柄。
    pub fn wait_for(&self, max_polls: u32) -> Result<(), Error> {
        for _ in 0..max_polls {
            match self.poll() {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => core::hint::spin_loop(),
            }
        }
        Err(Error::Timeout)
    }

    /// Waits for completion, woken by the DMA interrupt.
    /// 异步等待完成，由 DMA 中断唤醒。
    pub async fn wait_async(self) -> Result<(), Error> {
        poll_fn(|cx| {
            self.eeprom.engine.register_waker(cx.waker());
            match self.poll() {
                Ok(()) => Poll::Ready(Ok(())),
                Err(nb::Error::Other(e)) => Poll::Ready(Err(e)),
                Err(nb::Error::WouldBlock) => {
                    // DMA finished but the shifter is still draining, nothing
                    // will wake us for that.
                    if self.eeprom.engine.is_done() {
                        cx.waker().wake_by_ref();
                    }
                    Poll::Pending
                }
            }
        })
        .await
    }

    fn buffers_released(&self) -> bool {
        let engine = self.eeprom.engine;
        engine.has_error() || engine.completion().state() != PollState::AwaitingHardware
    }
}

impl<S: SpiMaster, D: DmaController> Drop for Pending<'_, '_, S, D> {
    fn drop(&mut self) {
        while !self.buffers_released() {
            core::hint::spin_loop();
        }
    }
}
