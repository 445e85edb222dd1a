// src/dma.rs

//! Ping-pong DMA transfer engine / 乒乓 DMA 传输引擎
//!
//! Owns the TX and RX channels of the SPI master. A transfer is either a
//! single packet (PONG only) or two packets chained PING -> PONG, which the
//! hardware streams back-to-back while chip select stays asserted.
//! 管理 SPI 主机的 TX 与 RX 通道。一次传输要么是单个数据包（仅 PONG），
//! 要么是 PING -> PONG 链接的两个数据包，硬件在片选保持有效期间连续发送。
//!
//! Completion is reported from [`DmaEngine::on_interrupt`], which must be
//! called from the DMA interrupt handler. Once both channels report done the
//! injected [`Completion`] strategy decides whether the whole operation has
//! settled or whether it armed a follow-up transfer.
//! 完成状态由 [`DmaEngine::on_interrupt`] 上报，必须在 DMA 中断处理函数中调用。
//! 两个通道都完成后，由注入的 [`Completion`] 策略决定操作是否结束或已启动后续传输。

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use core::task::Waker;

use embassy_sync::waitqueue::AtomicWaker;

use crate::error::Error;
use crate::hal::{Channel, Descriptor, DmaController, DmaResponse, HwError};

// --- Packets / 数据包 ---

/// Byte clocked out when a packet has no source buffer (SPI default TX value).
/// 数据包没有源缓冲区时发送的字节（SPI 默认发送值）。
pub const DEFAULT_FILL: u8 = 0xFF;

/// One DMA packet: `len` bytes from `src` to the TX FIFO and `len` bytes from
/// the RX FIFO to `dst`.
/// 一个 DMA 数据包：从 `src` 向 TX FIFO 发送 `len` 字节，并从 RX FIFO 向 `dst` 接收 `len` 字节。
///
/// A null `src` transmits the engine's fill byte, a null `dst` discards the
/// received bytes. The packet does not own the memory it points to.
/// `src` 为空时发送填充字节，`dst` 为空时丢弃接收数据。数据包不拥有其指向的内存。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    src: *const u8,
    dst: *mut u8,
    len: u16,
}

impl Packet {
    /// Largest packet one descriptor can move.
    /// 单个描述符可传输的最大长度。
    pub const MAX_LEN: usize = u16::MAX as usize;

    /// Raw packet, null pointers select the fill byte or the sink.
    /// 原始数据包，空指针表示使用填充字节或丢弃接收。
    pub const fn new(src: *const u8, dst: *mut u8, len: u16) -> Self {
        Self { src, dst, len }
    }

    /// Transmit `data`, discard whatever comes back.
    /// 发送 `data`，丢弃返回的数据。
    ///
    /// Fails with [`Error::InvalidLength`] above [`Packet::MAX_LEN`] bytes.
    /// 超过 [`Packet::MAX_LEN`] 字节时返回 [`Error::InvalidLength`]。
    pub fn transmit(data: &[u8]) -> Result<Self, Error> {
        Ok(Self::new(data.as_ptr(), ptr::null_mut(), descriptor_len(data.len())?))
    }

    /// Clock out fill bytes and store the response in `buf`.
    /// 发送填充字节并将响应存入 `buf`。
    ///
    /// Same length limit as [`Packet::transmit`].
    pub fn receive(buf: &mut [u8]) -> Result<Self, Error> {
        Ok(Self::new(ptr::null(), buf.as_mut_ptr(), descriptor_len(buf.len())?))
    }

    pub const fn src(&self) -> *const u8 {
        self.src
    }

    pub const fn dst(&self) -> *mut u8 {
        self.dst
    }

    pub const fn len(&self) -> u16 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn descriptor_len(len: usize) -> Result<u16, Error> {
    u16::try_from(len).map_err(|_| Error::InvalidLength)
}

// --- Transfer State / 传输状态 ---

/// Completion flags shared between the DMA interrupt and the foreground.
/// DMA 中断与前台共享的完成标志。
///
/// Written by the interrupt handler while a transfer is in flight and by
/// [`DmaEngine::reset`] / the arming path while none is, never both at once.
/// 传输进行中由中断写入，空闲时由 [`DmaEngine::reset`] 或启动路径写入，二者不会同时发生。
pub struct TransferState {
    tx_done: AtomicBool,
    rx_done: AtomicBool,
    tx_error: AtomicBool,
    rx_error: AtomicBool,
    extension_done: AtomicBool,
}

impl TransferState {
    pub const fn new() -> Self {
        Self {
            tx_done: AtomicBool::new(false),
            rx_done: AtomicBool::new(false),
            tx_error: AtomicBool::new(false),
            rx_error: AtomicBool::new(false),
            extension_done: AtomicBool::new(false),
        }
    }

    /// Both channels finished and the completion strategy reported settled.
    /// 两个通道均完成且完成策略报告操作结束。
    pub fn is_done(&self) -> bool {
        self.channels_done() && self.extension_done.load(Ordering::Acquire)
    }

    /// Either channel reported a fault. / 任一通道报告故障。
    pub fn has_error(&self) -> bool {
        self.tx_error.load(Ordering::Acquire) || self.rx_error.load(Ordering::Acquire)
    }

    /// Both channels finished their descriptors, follow-ups not considered.
    pub fn channels_done(&self) -> bool {
        self.tx_done.load(Ordering::Acquire) && self.rx_done.load(Ordering::Acquire)
    }

    /// Every channel reached either done or error.
    /// 每个通道都已到达完成或错误状态。
    pub fn channels_terminal(&self) -> bool {
        (self.tx_done.load(Ordering::Acquire) || self.tx_error.load(Ordering::Acquire))
            && (self.rx_done.load(Ordering::Acquire) || self.rx_error.load(Ordering::Acquire))
    }

    fn begin(&self) {
        self.tx_done.store(false, Ordering::Release);
        self.rx_done.store(false, Ordering::Release);
        self.extension_done.store(false, Ordering::Release);
    }

    fn baseline(&self) {
        self.tx_error.store(false, Ordering::Release);
        self.rx_error.store(false, Ordering::Release);
        self.tx_done.store(true, Ordering::Release);
        self.rx_done.store(true, Ordering::Release);
        self.extension_done.store(true, Ordering::Release);
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new()
    }
}

// --- Strategy Traits / 策略接口 ---

/// Arming side of the engine, handed to [`Completion`] strategies so they can
/// chain follow-up transfers from interrupt context.
/// 引擎的启动接口，交给 [`Completion`] 策略以便在中断上下文中链接后续传输。
pub trait Link {
    /// Arms a single packet on the PONG descriptors.
    /// 在 PONG 描述符上启动单个数据包。
    ///
    /// # Safety
    ///
    /// The memory behind the packet must stay valid until the engine reports
    /// the transfer as done or faulted.
    unsafe fn send_single(&self, pong: Packet);

    /// Arms `ping` followed by `pong` as one continuous transfer.
    ///
    /// # Safety
    ///
    /// Same as [`Link::send_single`], for both packets.
    unsafe fn send_chained(&self, ping: Packet, pong: Packet);
}

/// Strategy run in interrupt context once both channels completed.
/// 两个通道完成后在中断上下文中运行的策略。
pub trait Completion {
    /// Returns `true` when the operation is fully done, `false` when a
    /// follow-up transfer was armed through `link`.
    fn on_settled(&self, link: &dyn Link) -> bool;
}

/// Completion strategy for plain transfers: everything is done as soon as
/// the channels are.
/// 普通传输的完成策略：通道完成即操作完成。
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDone;

impl Completion for AlwaysDone {
    fn on_settled(&self, _link: &dyn Link) -> bool {
        true
    }
}

// --- Engine / 传输引擎 ---

/// Transfer engine over a [`DmaController`].
/// 基于 [`DmaController`] 的传输引擎。
///
/// All methods take `&self`, so the engine can live in a `static` shared
/// with the interrupt handler.
/// 所有方法均为 `&self`，引擎可放在与中断处理函数共享的 `static` 中。
pub struct DmaEngine<D, C = AlwaysDone> {
    dma: D,
    completion: C,
    state: TransferState,
    ready: AtomicBool,
    waker: AtomicWaker,
    fill: u8,
    sink: AtomicU8,
}

impl<D: DmaController, C: Completion> DmaEngine<D, C> {
    /// Creates an uninitialized engine with the default fill byte.
    /// 创建未初始化的引擎，使用默认填充字节。
    pub const fn new(dma: D, completion: C) -> Self {
        Self::with_fill(dma, completion, DEFAULT_FILL)
    }

    /// Like [`DmaEngine::new`] with a custom byte for source-less packets.
    /// 同 [`DmaEngine::new`]，但为无源数据包指定填充字节。
    pub const fn with_fill(dma: D, completion: C, fill: u8) -> Self {
        Self {
            dma,
            completion,
            state: TransferState::new(),
            ready: AtomicBool::new(false),
            waker: AtomicWaker::new(),
            fill,
            sink: AtomicU8::new(0),
        }
    }

    /// Configures all four descriptors and both channels, points them at the
    /// SPI FIFOs and enables the channel interrupts.
    /// 配置全部四个描述符与两个通道，指向 SPI FIFO 并使能通道中断。
    ///
    /// On failure the engine stays unready and drops every transfer.
    /// 失败时引擎保持未就绪状态，并丢弃所有传输请求。
    pub fn init(&self, tx_fifo: *mut u8, rx_fifo: *const u8) -> Result<(), HwError> {
        self.ready.store(false, Ordering::Release);
        self.state.baseline();

        for channel in Channel::ALL {
            for descriptor in Descriptor::ALL {
                self.dma.configure_descriptor(channel, descriptor)?;
            }
        }
        for channel in Channel::ALL {
            self.dma.configure_channel(channel)?;
        }

        for descriptor in Descriptor::ALL {
            self.dma.set_destination(Channel::Tx, descriptor, tx_fifo, false);
            self.dma.set_source(Channel::Rx, descriptor, rx_fifo, false);
        }

        self.dma.enable_interrupts();
        self.ready.store(true, Ordering::Release);
        debug!("dma engine ready");
        Ok(())
    }

    /// `init` succeeded. / `init` 已成功。
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn completion(&self) -> &C {
        &self.completion
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// Last transfer and its follow-ups finished. / 上一次传输及其后续传输已完成。
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    pub fn has_error(&self) -> bool {
        self.state.has_error()
    }

    /// Fault bits of the last PONG responses of both channels, with the
    /// normal terminal codes masked out. Zero means no fault.
    /// 两个通道最近一次 PONG 响应的故障位（已屏蔽正常结束码），0 表示无故障。
    pub fn dma_fault(&self) -> u8 {
        (self.dma.response(Channel::Rx, Descriptor::Pong).bits()
            | self.dma.response(Channel::Tx, Descriptor::Pong).bits())
            & !DmaResponse::TERMINAL_MASK
    }

    /// Registers a waker woken from the interrupt once the engine is done or
    /// faulted.
    /// 注册一个唤醒器，引擎完成或出错时由中断唤醒。
    pub fn register_waker(&self, waker: &Waker) {
        self.waker.register(waker);
    }

    /// Waits for both channels to reach done or error, then restores the
    /// idle baseline. Must not race an in-flight transfer that is still
    /// being re-armed.
    /// 等待两个通道都到达完成或错误状态，然后恢复空闲基线。
    pub fn reset(&self) {
        while !self.state.channels_terminal() {
            core::hint::spin_loop();
        }
        self.state.baseline();
        debug!("dma engine reset");
    }

    /// Arms a single packet on the PONG descriptors.
    /// 在 PONG 描述符上启动单个数据包。
    ///
    /// Ignored while the engine is not initialized or the previous transfer
    /// has not finished.
    ///
    /// # Safety
    ///
    /// The buffers referenced by `pong` must stay valid and must not be
    /// accessed until the transfer is done or faulted.
    pub unsafe fn send_single(&self, pong: Packet) {
        if !self.accepts() {
            return;
        }

        for channel in Channel::ALL {
            self.dma.set_current(channel, Descriptor::Pong);
            self.dma.set_descriptor_enabled(channel, Descriptor::Ping, false);
            self.dma.set_descriptor_enabled(channel, Descriptor::Pong, true);
        }
        self.program(Descriptor::Pong, &pong);
        self.start();
    }

    /// Arms `ping` followed by `pong`. Chip select stays asserted across the
    /// hand-over so a command phase flows straight into its data phase.
    /// 依次启动 `ping` 与 `pong`，片选在切换期间保持有效，命令阶段直接衔接数据阶段。
    ///
    /// # Safety
    ///
    /// Same as [`DmaEngine::send_single`], for both packets.
    pub unsafe fn send_chained(&self, ping: Packet, pong: Packet) {
        if !self.accepts() {
            return;
        }

        for channel in Channel::ALL {
            self.dma.set_current(channel, Descriptor::Ping);
            for descriptor in Descriptor::ALL {
                self.dma.set_descriptor_enabled(channel, descriptor, true);
            }
        }
        self.program(Descriptor::Ping, &ping);
        self.program(Descriptor::Pong, &pong);
        self.start();
    }

    /// DMA interrupt handler body. May see either or both channels pending.
    /// DMA 中断处理主体，可能同时有一个或两个通道挂起。
    pub fn on_interrupt(&self) {
        let mut handled = false;

        if self.dma.interrupt_pending(Channel::Tx) {
            handled = true;
            // TX reports `Done` before the descriptor auto-disarms; only the
            // invalidated descriptor marks the end of the transfer.
            match self.dma.response(Channel::Tx, Descriptor::Pong) {
                DmaResponse::InvalidDescriptor => self.state.tx_done.store(true, Ordering::Release),
                DmaResponse::Done => {}
                response => {
                    error!("tx dma fault: {:?}", response);
                    self.state.tx_error.store(true, Ordering::Release);
                }
            }
            self.dma.clear_interrupt(Channel::Tx);
        }

        if self.dma.interrupt_pending(Channel::Rx) {
            handled = true;
            match self.dma.response(Channel::Rx, Descriptor::Pong) {
                DmaResponse::Done | DmaResponse::InvalidDescriptor => {
                    self.state.rx_done.store(true, Ordering::Release)
                }
                response => {
                    error!("rx dma fault: {:?}", response);
                    self.state.rx_error.store(true, Ordering::Release);
                }
            }
            self.dma.clear_interrupt(Channel::Rx);
        }

        if handled && self.state.channels_done() {
            let settled = self.completion.on_settled(self);
            trace!("dma channels done, settled = {}", settled);
            self.state.extension_done.store(settled, Ordering::Release);
        }

        if self.state.is_done() || self.state.has_error() {
            self.waker.wake();
        }
    }

    // --- Private Helper Functions / 私有辅助函数 ---

    fn accepts(&self) -> bool {
        if !self.is_ready() {
            warn!("dma engine not initialized, transfer dropped");
            return false;
        }
        if !self.state.channels_done() {
            warn!("dma transfer in flight, transfer dropped");
            return false;
        }
        true
    }

    fn program(&self, descriptor: Descriptor, packet: &Packet) {
        let (src, src_increment) = if packet.src.is_null() {
            (&self.fill as *const u8, false)
        } else {
            (packet.src, true)
        };
        let (dst, dst_increment) = if packet.dst.is_null() {
            (self.sink.as_ptr(), false)
        } else {
            (packet.dst, true)
        };

        self.dma.set_source(Channel::Tx, descriptor, src, src_increment);
        self.dma.set_destination(Channel::Rx, descriptor, dst, dst_increment);
        self.dma.set_count(Channel::Tx, descriptor, packet.len);
        self.dma.set_count(Channel::Rx, descriptor, packet.len);
    }

    fn start(&self) {
        self.state.begin();
        // RX first so no received byte can be lost once TX starts clocking.
        self.dma.enable_channel(Channel::Rx);
        self.dma.enable_channel(Channel::Tx);
    }
}

impl<D: DmaController, C: Completion> Link for DmaEngine<D, C> {
    unsafe fn send_single(&self, pong: Packet) {
        // SAFETY: forwarded contract.
        unsafe { DmaEngine::send_single(self, pong) }
    }

    unsafe fn send_chained(&self, ping: Packet, pong: Packet) {
        // SAFETY: forwarded contract.
        unsafe { DmaEngine::send_chained(self, ping, pong) }
    }
}
