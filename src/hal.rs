// src/hal.rs

//! Hardware capabilities consumed by the driver.
//! 驱动所依赖的硬件能力。
//!
//! The driver does not touch registers itself. A board support crate hands
//! it an SPI master that has its FIFOs exposed and a DMA controller with two
//! channels (TX and RX), each owning a PING and a PONG descriptor that can be
//! chained in hardware.
//! 驱动本身不访问寄存器。板级支持包提供暴露 FIFO 的 SPI 主机，以及带 TX/RX 两个通道的
//! DMA 控制器，每个通道拥有可在硬件中链接的 PING 与 PONG 描述符。

use core::fmt;

// --- DMA Addressing / DMA 寻址 ---

/// DMA channel, named after the SPI FIFO it serves.
/// DMA 通道，以其服务的 SPI FIFO 命名。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Memory -> SPI TX FIFO.
    Tx,
    /// SPI RX FIFO -> memory.
    Rx,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Tx, Channel::Rx];
}

/// One of the two descriptors owned by every channel.
/// 每个通道拥有的两个描述符之一。
///
/// PING carries the command phase of a chained transfer and hands over to
/// PONG without deasserting chip select. Single transfers only use PONG.
/// PING 承载链式传输的命令阶段，并在不释放片选的情况下切换到 PONG。单次传输只使用 PONG。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Descriptor {
    Ping,
    Pong,
}

impl Descriptor {
    pub const ALL: [Descriptor; 2] = [Descriptor::Ping, Descriptor::Pong];
}

/// Response code latched by a descriptor after it ran.
/// 描述符执行后锁存的响应码。
///
/// Codes are single bits so that responses of both channels can be merged
/// into one fault value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DmaResponse {
    /// Descriptor has not reported anything yet.
    NoResponse = 0x00,
    /// Transfer finished normally.
    Done = 0x01,
    /// Descriptor finished and was invalidated (one-shot descriptors).
    InvalidDescriptor = 0x02,
    SrcBusError = 0x04,
    DstBusError = 0x08,
    SrcMisaligned = 0x10,
    DstMisaligned = 0x20,
    /// Channel was disabled while the descriptor was active.
    ChannelDisabled = 0x40,
}

impl DmaResponse {
    /// Responses that terminate a healthy transfer.
    /// 正常结束传输的响应码。
    pub const TERMINAL_MASK: u8 = DmaResponse::Done as u8 | DmaResponse::InvalidDescriptor as u8;

    /// Raw response bit. / 原始响应位。
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Whether the response reports a fault.
    /// 响应是否表示故障。
    pub const fn is_fault(self) -> bool {
        self.bits() & !Self::TERMINAL_MASK != 0
    }
}

// --- SPI Status / SPI 状态 ---

/// Bit positions of the SPI master status word returned by
/// [`SpiMaster::master_status`].
/// [`SpiMaster::master_status`] 返回的 SPI 主机状态字的位定义。
pub struct SpiStatus;

impl SpiStatus {
    /// Last transfer shifted out completely. Not an error.
    /// 上一次传输已完全移出，不属于错误。
    pub const MASTER_DONE: u32 = 1 << 9;
    /// RX FIFO overflowed.
    pub const RX_OVERFLOW: u32 = 1 << 5;
    /// TX FIFO underflowed while the master was clocking.
    pub const TX_UNDERFLOW: u32 = 1 << 6;
    /// Bus error on the SPI interface.
    pub const BUS_ERROR: u32 = 1 << 8;
}

/// Vendor status code of a rejected peripheral configuration.
/// 外设配置被拒绝时的厂商状态码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HwError(pub u32);

impl fmt::Display for HwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hardware configuration rejected (code {:#010x})", self.0)
    }
}

// --- Hardware Traits / 硬件接口 ---

/// SPI master with DMA accessible FIFOs.
/// FIFO 可由 DMA 访问的 SPI 主机。
pub trait SpiMaster {
    /// Configures and enables the master block.
    /// 配置并使能主机模块。
    fn init(&mut self) -> Result<(), HwError>;

    /// Address of the TX FIFO write register.
    fn tx_fifo(&self) -> *mut u8;

    /// Address of the RX FIFO read register.
    fn rx_fifo(&self) -> *const u8;

    /// All bytes written to the TX FIFO have been shifted out.
    /// 写入 TX FIFO 的所有字节均已移出。
    fn is_tx_complete(&self) -> bool;

    /// Raw master status bits, see [`SpiStatus`].
    fn master_status(&self) -> u32;

    /// Drops anything left in both FIFOs.
    /// 清空两个 FIFO 中的残留数据。
    fn clear_fifos(&mut self);
}

/// Two channel DMA controller with PING/PONG descriptor chaining.
/// 支持 PING/PONG 描述符链接的双通道 DMA 控制器。
///
/// Methods take `&self` because the controller is shared between the
/// foreground and the DMA interrupt, the same way memory mapped registers
/// are. Addresses handed to `set_source`/`set_destination` are dereferenced
/// by the hardware only after [`DmaController::enable_channel`].
/// 方法均为 `&self`，因为控制器在前台与 DMA 中断之间共享。
pub trait DmaController {
    /// Loads the static part of a descriptor (element size, trigger, interrupt
    /// on completion for PONG, chaining PING -> PONG).
    fn configure_descriptor(&self, channel: Channel, descriptor: Descriptor) -> Result<(), HwError>;

    /// Configures the channel itself (priority, trigger routing).
    fn configure_channel(&self, channel: Channel) -> Result<(), HwError>;

    /// Source address of a descriptor, optionally post-incremented.
    /// 描述符的源地址，可选地址自增。
    fn set_source(&self, channel: Channel, descriptor: Descriptor, addr: *const u8, increment: bool);

    /// Destination address of a descriptor. / 描述符的目标地址。
    fn set_destination(&self, channel: Channel, descriptor: Descriptor, addr: *mut u8, increment: bool);

    /// Number of bytes the descriptor moves.
    fn set_count(&self, channel: Channel, descriptor: Descriptor, count: u16);

    /// Descriptor the channel starts from on the next enable.
    fn set_current(&self, channel: Channel, descriptor: Descriptor);

    /// Validates or invalidates a descriptor.
    fn set_descriptor_enabled(&self, channel: Channel, descriptor: Descriptor, enabled: bool);

    /// Starts the channel. / 启动通道。
    fn enable_channel(&self, channel: Channel);

    /// Unmasks the completion interrupt of both channels and enables the
    /// interrupt line in the NVIC.
    fn enable_interrupts(&self);

    fn interrupt_pending(&self, channel: Channel) -> bool;

    /// Acknowledges the channel interrupt. / 清除通道中断标志。
    fn clear_interrupt(&self, channel: Channel);

    /// Latched response of a descriptor.
    /// 描述符锁存的响应码。
    fn response(&self, channel: Channel, descriptor: Descriptor) -> DmaResponse;
}

impl<T: DmaController + ?Sized> DmaController for &T {
    fn configure_descriptor(&self, channel: Channel, descriptor: Descriptor) -> Result<(), HwError> {
        T::configure_descriptor(self, channel, descriptor)
    }

    fn configure_channel(&self, channel: Channel) -> Result<(), HwError> {
        T::configure_channel(self, channel)
    }

    fn set_source(&self, channel: Channel, descriptor: Descriptor, addr: *const u8, increment: bool) {
        T::set_source(self, channel, descriptor, addr, increment)
    }

    fn set_destination(&self, channel: Channel, descriptor: Descriptor, addr: *mut u8, increment: bool) {
        T::set_destination(self, channel, descriptor, addr, increment)
    }

    fn set_count(&self, channel: Channel, descriptor: Descriptor, count: u16) {
        T::set_count(self, channel, descriptor, count)
    }

    fn set_current(&self, channel: Channel, descriptor: Descriptor) {
        T::set_current(self, channel, descriptor)
    }

    fn set_descriptor_enabled(&self, channel: Channel, descriptor: Descriptor, enabled: bool) {
        T::set_descriptor_enabled(self, channel, descriptor, enabled)
    }

    fn enable_channel(&self, channel: Channel) {
        T::enable_channel(self, channel)
    }

    fn enable_interrupts(&self) {
        T::enable_interrupts(self)
    }

    fn interrupt_pending(&self, channel: Channel) -> bool {
        T::interrupt_pending(self, channel)
    }

    fn clear_interrupt(&self, channel: Channel) {
        T::clear_interrupt(self, channel)
    }

    fn response(&self, channel: Channel, descriptor: Descriptor) -> DmaResponse {
        T::response(self, channel, descriptor)
    }
}
