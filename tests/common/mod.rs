//! Host-side simulation of the SPI master, the DMA controller and a serial
//! flash device, used by the integration tests.

#![allow(dead_code)]

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use spi_eeprom_dma::{
    Channel, Config, Descriptor, DmaController, DmaEngine, DmaResponse, HwError, SpiEeprom,
    SpiMaster, StatusPoll, StatusRegister,
};

pub const MANUFACTURER: u8 = 0xEF;
pub const MEMORY_TYPE: u8 = 0x40;
pub const CAPACITY: u8 = 0x17;

pub type SimEngine = DmaEngine<&'static SimDma, StatusPoll>;
pub type SimEeprom = SpiEeprom<'static, SimSpi, &'static SimDma>;

// --- Flash device ---

/// Serial flash behind the chip select. Commands take effect on the rising
/// edge of chip select, like the real part.
pub struct SimFlash {
    memory: HashMap<u32, u8>,
    status: u8,
    status2: u8,
    config: u8,
    address_bytes: usize,
    page_size: u32,
    /// Status reads reporting busy after every write-type command.
    pub busy_reads: u32,
    busy_left: u32,
    /// Never leaves the busy state while set.
    pub stuck: bool,
    /// Block protect bits survive every status write.
    pub stuck_protect: bool,
    selected: bool,
    frame: Vec<u8>,
    frames: Vec<Vec<u8>>,
    status_reads: u32,
}

impl SimFlash {
    pub fn new() -> Self {
        Self {
            memory: HashMap::new(),
            status: 0,
            status2: 0,
            config: 0,
            address_bytes: 3,
            page_size: 256,
            busy_reads: 0,
            busy_left: 0,
            stuck: false,
            stuck_protect: false,
            selected: false,
            frame: Vec::new(),
            frames: Vec::new(),
            status_reads: 0,
        }
    }

    pub fn with_busy_reads(mut self, reads: u32) -> Self {
        self.busy_reads = reads;
        self
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn with_address_bytes(mut self, bytes: usize) -> Self {
        self.address_bytes = bytes;
        self
    }

    pub fn status(&self) -> StatusRegister {
        StatusRegister(self.status)
    }

    pub fn byte(&self, address: u32) -> u8 {
        self.memory.get(&address).copied().unwrap_or(0xFF)
    }

    pub fn fill(&mut self, address: u32, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *b);
        }
    }

    /// MOSI bytes of every completed chip select frame.
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn frames_with(&self, opcode: u8) -> usize {
        self.frames.iter().filter(|f| f.first() == Some(&opcode)).count()
    }

    pub fn status_reads(&self) -> u32 {
        self.status_reads
    }

    pub fn clear_log(&mut self) {
        self.frames.clear();
        self.status_reads = 0;
    }

    fn select(&mut self) {
        self.selected = true;
        self.frame.clear();
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        assert!(self.selected, "byte clocked without chip select");
        self.frame.push(mosi);
        let index = self.frame.len() - 1;
        if index == 0 {
            return 0xFF;
        }

        match self.frame[0] {
            0x05 if index == 1 => self.report_status(),
            0x05 => self.status,
            0x07 => self.status2,
            0x35 => self.config,
            0x9F => match index {
                1 => MANUFACTURER,
                2 => MEMORY_TYPE,
                3 => CAPACITY,
                _ => 0xFF,
            },
            0x03 if index > self.address_bytes => {
                let offset = (index - 1 - self.address_bytes) as u32;
                self.byte(self.address() + offset)
            }
            _ => 0xFF,
        }
    }

    fn deselect(&mut self) {
        self.selected = false;
        let frame = std::mem::take(&mut self.frame);
        if let Some(&opcode) = frame.first() {
            self.execute(opcode, &frame);
        }
        self.frames.push(frame);
    }

    fn report_status(&mut self) -> u8 {
        self.status_reads += 1;
        if self.status & StatusRegister::WIP != 0 && !self.stuck {
            if self.busy_left > 0 {
                self.busy_left -= 1;
            } else {
                self.status &= !(StatusRegister::WIP | StatusRegister::WEL);
            }
        }
        self.status
    }

    fn address(&self) -> u32 {
        self.address_of(&self.frame)
    }

    fn execute(&mut self, opcode: u8, frame: &[u8]) {
        let writable = self.status & StatusRegister::WEL != 0
            && self.status & StatusRegister::WIP == 0;
        match opcode {
            0x06 => self.status |= StatusRegister::WEL,
            0x04 => self.status &= !StatusRegister::WEL,
            0x01 if writable && frame.len() >= 2 => {
                let mut value = frame[1] & !(StatusRegister::WIP | StatusRegister::WEL);
                if self.stuck_protect {
                    value |= StatusRegister::PROTECT_ALL_BLOCKS;
                }
                self.status = (self.status & (StatusRegister::WIP | StatusRegister::WEL)) | value;
                self.start_busy();
            }
            0x02 if writable && frame.len() > 1 + self.address_bytes => {
                let address = self.address_of(frame);
                let page_base = address - address % self.page_size;
                for (i, b) in frame[1 + self.address_bytes..].iter().enumerate() {
                    let target = page_base + (address % self.page_size + i as u32) % self.page_size;
                    let old = self.byte(target);
                    self.memory.insert(target, old & b);
                }
                self.start_busy();
            }
            0x20 | 0x52 | 0xD8 if writable && frame.len() > self.address_bytes => {
                let size = match opcode {
                    0x20 => 4 * 1024,
                    0x52 => 32 * 1024,
                    _ => 64 * 1024,
                };
                let base = self.address_of(frame) / size * size;
                self.memory.retain(|a, _| *a < base || *a >= base + size);
                self.start_busy();
            }
            0x60 | 0xC7 if writable => {
                self.memory.clear();
                self.start_busy();
            }
            _ => {}
        }
    }

    fn address_of(&self, frame: &[u8]) -> u32 {
        frame[1..=self.address_bytes]
            .iter()
            .fold(0u32, |acc, b| acc << 8 | u32::from(*b))
    }

    fn start_busy(&mut self) {
        self.status |= StatusRegister::WIP;
        self.busy_left = self.busy_reads;
    }
}

// --- DMA controller ---

#[derive(Debug, Clone, Copy)]
struct Desc {
    src: *const u8,
    src_increment: bool,
    dst: *mut u8,
    dst_increment: bool,
    count: u16,
    enabled: bool,
    response: DmaResponse,
}

impl Default for Desc {
    fn default() -> Self {
        Self {
            src: std::ptr::null(),
            src_increment: false,
            dst: std::ptr::null_mut(),
            dst_increment: false,
            count: 0,
            enabled: false,
            response: DmaResponse::NoResponse,
        }
    }
}

#[derive(Debug, Default)]
struct ChannelRegs {
    desc: [Desc; 2],
    current: usize,
    pending: bool,
    configured: bool,
    fault: Option<DmaResponse>,
}

fn slot(descriptor: Descriptor) -> usize {
    match descriptor {
        Descriptor::Ping => 0,
        Descriptor::Pong => 1,
    }
}

fn index(channel: Channel) -> usize {
    match channel {
        Channel::Tx => 0,
        Channel::Rx => 1,
    }
}

/// Two channel DMA controller moving bytes between memory and [`SimFlash`].
///
/// The transfer runs when the TX channel is enabled. Completion raises both
/// channel interrupts; with `auto_irq` set the attached handler runs right
/// away, never nested inside itself.
pub struct SimDma {
    channels: RefCell<[ChannelRegs; 2]>,
    flash: RefCell<SimFlash>,
    irq: RefCell<Option<Rc<dyn Fn()>>>,
    irq_enabled: Cell<bool>,
    auto_irq: Cell<bool>,
    delivering: Cell<bool>,
    fail_configure: Cell<Option<u32>>,
    transfers: Cell<u32>,
}

impl SimDma {
    pub fn new(flash: SimFlash) -> Self {
        Self {
            channels: RefCell::new(Default::default()),
            flash: RefCell::new(flash),
            irq: RefCell::new(None),
            irq_enabled: Cell::new(false),
            auto_irq: Cell::new(true),
            delivering: Cell::new(false),
            fail_configure: Cell::new(None),
            transfers: Cell::new(0),
        }
    }

    pub fn attach(&self, handler: impl Fn() + 'static) {
        *self.irq.borrow_mut() = Some(Rc::new(handler));
    }

    pub fn flash(&self) -> Ref<'_, SimFlash> {
        self.flash.borrow()
    }

    pub fn flash_mut(&self) -> RefMut<'_, SimFlash> {
        self.flash.borrow_mut()
    }

    pub fn set_auto_irq(&self, auto: bool) {
        self.auto_irq.set(auto);
    }

    pub fn fail_configure(&self, code: u32) {
        self.fail_configure.set(Some(code));
    }

    /// Next transfer ends with `response` on the PONG descriptor of `channel`.
    pub fn inject_fault(&self, channel: Channel, response: DmaResponse) {
        self.channels.borrow_mut()[index(channel)].fault = Some(response);
    }

    pub fn force_response(&self, channel: Channel, descriptor: Descriptor, response: DmaResponse) {
        self.channels.borrow_mut()[index(channel)].desc[slot(descriptor)].response = response;
    }

    pub fn raise(&self, channel: Channel) {
        self.channels.borrow_mut()[index(channel)].pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.channels.borrow().iter().any(|c| c.pending)
    }

    pub fn is_configured(&self) -> bool {
        self.channels.borrow().iter().all(|c| c.configured) && self.irq_enabled.get()
    }

    /// Transfers started on the hardware.
    pub fn transfers(&self) -> u32 {
        self.transfers.get()
    }

    /// Runs the interrupt handler once if an interrupt is pending.
    pub fn fire(&self) -> bool {
        if !self.is_pending() {
            return false;
        }
        let handler = self.irq.borrow().clone();
        if let Some(handler) = handler {
            handler();
        }
        true
    }

    fn deliver(&self) {
        if !self.auto_irq.get() || !self.irq_enabled.get() || self.delivering.get() {
            return;
        }
        self.delivering.set(true);
        while self.auto_irq.get() && self.fire() {}
        self.delivering.set(false);
    }

    fn run(&self) {
        let (tx, rx, first) = {
            let channels = self.channels.borrow();
            (channels[0].desc, channels[1].desc, channels[0].current)
        };
        self.transfers.set(self.transfers.get() + 1);

        {
            let mut flash = self.flash.borrow_mut();
            flash.select();
            for d in first..2 {
                if !tx[d].enabled {
                    continue;
                }
                for i in 0..usize::from(tx[d].count) {
                    // SAFETY: the driver keeps every armed buffer alive until
                    // the transfer is done.
                    unsafe {
                        let src = if tx[d].src_increment { tx[d].src.add(i) } else { tx[d].src };
                        let miso = flash.exchange(*src);
                        let dst = if rx[d].dst_increment { rx[d].dst.add(i) } else { rx[d].dst };
                        *dst = miso;
                    }
                }
            }
            flash.deselect();
        }

        {
            let mut channels = self.channels.borrow_mut();
            for (i, channel) in channels.iter_mut().enumerate() {
                let normal = if i == 0 {
                    DmaResponse::InvalidDescriptor
                } else {
                    DmaResponse::Done
                };
                for desc in channel.desc.iter_mut() {
                    if desc.enabled {
                        desc.response = normal;
                        desc.enabled = false;
                    }
                }
                if let Some(fault) = channel.fault.take() {
                    channel.desc[1].response = fault;
                }
                channel.pending = true;
            }
        }

        self.deliver();
    }
}

impl DmaController for SimDma {
    fn configure_descriptor(&self, _channel: Channel, _descriptor: Descriptor) -> Result<(), HwError> {
        match self.fail_configure.get() {
            Some(code) => Err(HwError(code)),
            None => Ok(()),
        }
    }

    fn configure_channel(&self, channel: Channel) -> Result<(), HwError> {
        self.channels.borrow_mut()[index(channel)].configured = true;
        Ok(())
    }

    fn set_source(&self, channel: Channel, descriptor: Descriptor, addr: *const u8, increment: bool) {
        let mut channels = self.channels.borrow_mut();
        let desc = &mut channels[index(channel)].desc[slot(descriptor)];
        desc.src = addr;
        desc.src_increment = increment;
    }

    fn set_destination(&self, channel: Channel, descriptor: Descriptor, addr: *mut u8, increment: bool) {
        let mut channels = self.channels.borrow_mut();
        let desc = &mut channels[index(channel)].desc[slot(descriptor)];
        desc.dst = addr;
        desc.dst_increment = increment;
    }

    fn set_count(&self, channel: Channel, descriptor: Descriptor, count: u16) {
        self.channels.borrow_mut()[index(channel)].desc[slot(descriptor)].count = count;
    }

    fn set_current(&self, channel: Channel, descriptor: Descriptor) {
        self.channels.borrow_mut()[index(channel)].current = slot(descriptor);
    }

    fn set_descriptor_enabled(&self, channel: Channel, descriptor: Descriptor, enabled: bool) {
        self.channels.borrow_mut()[index(channel)].desc[slot(descriptor)].enabled = enabled;
    }

    fn enable_channel(&self, channel: Channel) {
        if channel == Channel::Tx {
            self.run();
        }
    }

    fn enable_interrupts(&self) {
        self.irq_enabled.set(true);
    }

    fn interrupt_pending(&self, channel: Channel) -> bool {
        self.channels.borrow()[index(channel)].pending
    }

    fn clear_interrupt(&self, channel: Channel) {
        self.channels.borrow_mut()[index(channel)].pending = false;
    }

    fn response(&self, channel: Channel, descriptor: Descriptor) -> DmaResponse {
        self.channels.borrow()[index(channel)].desc[slot(descriptor)].response
    }
}

// --- SPI master ---

pub struct SimSpi {
    pub fail_init: Option<u32>,
    pub status: Cell<u32>,
    pub tx_complete: Cell<bool>,
    pub fifo_clears: Cell<u32>,
    fifo: Cell<u8>,
}

impl SimSpi {
    pub fn new() -> Self {
        Self {
            fail_init: None,
            status: Cell::new(0),
            tx_complete: Cell::new(true),
            fifo_clears: Cell::new(0),
            fifo: Cell::new(0),
        }
    }
}

impl SpiMaster for SimSpi {
    fn init(&mut self) -> Result<(), HwError> {
        match self.fail_init {
            Some(code) => Err(HwError(code)),
            None => Ok(()),
        }
    }

    fn tx_fifo(&self) -> *mut u8 {
        self.fifo.as_ptr()
    }

    fn rx_fifo(&self) -> *const u8 {
        self.fifo.as_ptr()
    }

    fn is_tx_complete(&self) -> bool {
        self.tx_complete.get()
    }

    fn master_status(&self) -> u32 {
        self.status.get()
    }

    fn clear_fifos(&mut self) {
        self.fifo_clears.set(self.fifo_clears.get() + 1);
        self.status.set(0);
    }
}

// --- Wiring ---

pub struct Rig {
    pub dma: &'static SimDma,
    pub engine: &'static SimEngine,
}

/// Engine and controller with the interrupt line wired up.
pub fn rig(flash: SimFlash) -> Rig {
    let dma: &'static SimDma = Box::leak(Box::new(SimDma::new(flash)));
    let engine: &'static SimEngine = Box::leak(Box::new(DmaEngine::new(dma, StatusPoll::new())));
    dma.attach(move || engine.on_interrupt());
    Rig { dma, engine }
}

/// Initialized driver over a fresh simulated device.
pub fn eeprom(flash: SimFlash, config: Config) -> (Rig, SimEeprom) {
    let rig = rig(flash);
    let mut eeprom = SpiEeprom::new(SimSpi::new(), rig.engine, config);
    eeprom.init().unwrap();
    (rig, eeprom)
}
