// src/command.rs

//! Command set and command encoder / 命令集与命令编码器
//!
//! Builds the `[opcode, address...]` header of every instruction. Addresses
//! are page based (`page * page_size`) and go out most significant byte
//! first, with as many address bytes as the configured [`AddressWidth`].
//! 构建每条指令的 `[操作码, 地址...]` 命令头。地址以页为单位（`page * page_size`），
//! 高字节在前，地址字节数由 [`AddressWidth`] 决定。

use heapless::Vec;

use crate::error::Error;

// --- Command Definitions / 命令定义 ---

/// Longest command header: opcode plus a 32-bit address.
/// 最长命令头：操作码加 32 位地址。
pub const MAX_COMMAND_LEN: usize = 5;

/// Reusable command header buffer.
pub type CommandBuffer = Vec<u8, MAX_COMMAND_LEN>;

/// Instruction opcodes of the serial EEPROM.
/// 串行 EEPROM 指令操作码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    WriteStatus = 0x01,   // Write Status Register / 写状态寄存器
    PageProgram = 0x02,   // Page Program / 页面编程
    Read = 0x03,          // Standard Read / 标准读取
    WriteDisable = 0x04,  // Write Disable / 写禁止
    ReadStatus = 0x05,    // Read Status Register 1 / 读取状态寄存器1
    WriteEnable = 0x06,   // Write Enable (required before write/erase) / 写使能（写入/擦除前必需）
    ReadStatus2 = 0x07,   // Read Status Register 2 / 读取状态寄存器2
    SectorErase4k = 0x20, // 4KB Sector Erase / 4KB 扇区擦除
    ReadConfig = 0x35,    // Read Configuration Register / 读取配置寄存器
    BlockErase32k = 0x52, // 32KB Block Erase / 32KB 块擦除
    ChipErase = 0x60,     // Chip Erase / 整片擦除
    ChipEraseAlt = 0xC7,  // Chip Erase (alternate) / 整片擦除（备用）
    BlockErase64k = 0xD8, // 64KB Block Erase / 64KB 块擦除
    ReadId = 0x9F,        // Read JEDEC ID / 读取JEDEC ID
}

impl Opcode {
    /// Instruction byte on the wire. / 线上传输的指令字节。
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Decodes a known instruction byte. / 解码已知的指令字节。
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::WriteStatus,
            0x02 => Self::PageProgram,
            0x03 => Self::Read,
            0x04 => Self::WriteDisable,
            0x05 => Self::ReadStatus,
            0x06 => Self::WriteEnable,
            0x07 => Self::ReadStatus2,
            0x20 => Self::SectorErase4k,
            0x35 => Self::ReadConfig,
            0x52 => Self::BlockErase32k,
            0x60 => Self::ChipErase,
            0xC7 => Self::ChipEraseAlt,
            0xD8 => Self::BlockErase64k,
            0x9F => Self::ReadId,
            _ => return None,
        })
    }

    /// Opcodes that never start an internal write cycle.
    /// 不会启动内部写周期的操作码。
    pub const fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::Read | Self::ReadStatus | Self::ReadStatus2 | Self::ReadConfig | Self::ReadId
        )
    }
}

/// Whether a raw command byte is one of the read-only opcodes. Unknown
/// opcodes are treated as writes so that completion waits for the device.
/// 原始命令字节是否为只读操作码。未知操作码按写操作处理，完成前会等待器件空闲。
pub const fn is_read_only(byte: u8) -> bool {
    match Opcode::from_byte(byte) {
        Some(op) => op.is_read_only(),
        None => false,
    }
}

// --- Addressing / 地址编码 ---

/// Number of address bytes the device expects after an addressed opcode.
/// 带地址操作码之后器件期望的地址字节数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressWidth {
    Bits8,
    Bits16,
    #[default]
    Bits24,
    Bits32,
}

impl AddressWidth {
    /// Address bytes on the wire. / 地址字节数。
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
            Self::Bits24 => 3,
            Self::Bits32 => 4,
        }
    }

    /// Length of an addressed command header.
    pub const fn command_len(self) -> usize {
        1 + self.bytes()
    }

    /// Big-endian address bytes, truncated to the width.
    /// 按宽度截断的大端地址字节。
    pub fn pack(self, address: u32) -> [u8; 4] {
        let be = address.to_be_bytes();
        let mut out = [0u8; 4];
        out[..self.bytes()].copy_from_slice(&be[4 - self.bytes()..]);
        out
    }
}

/// Page layout of the device.
/// 器件的页布局。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Geometry {
    /// Bytes per program page.
    pub page_size: u16,
    /// Number of pages.
    pub page_count: u32,
}

impl Geometry {
    /// Default page size (256 bytes) / 默认页大小 (256 字节)
    pub const PAGE_SIZE: u16 = 256;
    /// Default page count (8MB device) / 默认页数 (8MB 器件)
    pub const PAGE_COUNT: u32 = 32768;

    /// Total capacity in bytes.
    pub const fn capacity(&self) -> u64 {
        self.page_size as u64 * self.page_count as u64
    }

    /// Byte address of the first byte of `page`.
    /// `page` 首字节的字节地址。
    pub fn page_address(&self, page: u32) -> Result<u32, Error> {
        if page >= self.page_count {
            return Err(Error::InvalidPage(page));
        }
        page.checked_mul(u32::from(self.page_size))
            .ok_or(Error::InvalidPage(page))
    }

    /// Clamps a transfer length to one page.
    /// 将传输长度限制在一页之内。
    pub fn clamp(&self, len: usize) -> usize {
        len.min(usize::from(self.page_size))
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            page_size: Self::PAGE_SIZE,
            page_count: Self::PAGE_COUNT,
        }
    }
}

// --- Encoder / 编码器 ---

/// Fills a [`CommandBuffer`] for the configured width and geometry.
/// 按配置的地址宽度与页布局填充 [`CommandBuffer`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Encoder {
    width: AddressWidth,
    geometry: Geometry,
}

impl Encoder {
    /// Creates an encoder. / 创建编码器。
    pub const fn new(width: AddressWidth, geometry: Geometry) -> Self {
        Self { width, geometry }
    }

    pub const fn width(&self) -> AddressWidth {
        self.width
    }

    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Opcode-only instruction. / 仅操作码的指令。
    pub fn opcode(&self, buf: &mut CommandBuffer, op: Opcode) -> Result<(), Error> {
        buf.clear();
        buf.push(op.byte()).map_err(|_| Error::InvalidCommand)
    }

    /// Opcode followed by one argument byte (register writes).
    /// 操作码加一个参数字节（写寄存器）。
    pub fn with_argument(&self, buf: &mut CommandBuffer, op: Opcode, argument: u8) -> Result<(), Error> {
        buf.clear();
        buf.extend_from_slice(&[op.byte(), argument])
            .map_err(|_| Error::InvalidCommand)
    }

    /// Opcode followed by the address of `page`. Rejects pages outside the
    /// device before touching `buf`.
    /// 操作码加 `page` 的地址。超出器件范围的页在修改 `buf` 之前即被拒绝。
    pub fn addressed(&self, buf: &mut CommandBuffer, op: Opcode, page: u32) -> Result<(), Error> {
        let address = self.geometry.page_address(page)?;
        let packed = self.width.pack(address);

        buf.clear();
        buf.push(op.byte()).map_err(|_| Error::InvalidCommand)?;
        buf.extend_from_slice(&packed[..self.width.bytes()])
            .map_err(|_| Error::InvalidCommand)
    }
}

// --- Registers / 寄存器 ---

/// Bits of status register 1.
/// 状态寄存器 1 的位定义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusRegister(pub u8);

impl StatusRegister {
    /// Write in progress.
    pub const WIP: u8 = 1 << 0;
    /// Write enable latch.
    pub const WEL: u8 = 1 << 1;
    /// BP[3:0], all blocks protected when every bit is set.
    pub const PROTECT_ALL_BLOCKS: u8 = 0xF << 2;
    /// Status register write disable.
    pub const SRWD: u8 = 1 << 7;

    /// WIP bit set, the device is busy. / WIP 位置位，器件忙。
    pub const fn is_write_in_progress(self) -> bool {
        self.0 & Self::WIP != 0
    }

    pub const fn is_write_enabled(self) -> bool {
        self.0 & Self::WEL != 0
    }

    /// Block protect bits, right aligned.
    pub const fn block_protect(self) -> u8 {
        (self.0 & Self::PROTECT_ALL_BLOCKS) >> 2
    }

    pub const fn is_protected(self) -> bool {
        self.0 & Self::PROTECT_ALL_BLOCKS != 0
    }

    /// Value written by the write-status instruction.
    /// 写状态寄存器指令写入的值。
    pub const fn protection(protect_all: bool) -> u8 {
        if protect_all {
            Self::SRWD | Self::PROTECT_ALL_BLOCKS
        } else {
            0
        }
    }
}

/// JEDEC identification returned by the read-ID instruction.
/// 读取 ID 指令返回的 JEDEC 标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JedecId {
    pub manufacturer: u8,
    pub memory_type: u8,
    pub capacity: u8,
}

impl From<[u8; 3]> for JedecId {
    fn from(raw: [u8; 3]) -> Self {
        Self {
            manufacturer: raw[0],
            memory_type: raw[1],
            capacity: raw[2],
        }
    }
}

impl JedecId {
    /// Capacity in bytes when the capacity code follows the `2^n` convention.
    pub fn capacity_bytes(&self) -> Option<u64> {
        1u64.checked_shl(u32::from(self.capacity))
    }
}
