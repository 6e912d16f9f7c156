//! # GPIO Memory Backend
//!
//! Drives the Raspberry Pi GPIO block through the `/dev/gpiomem` character
//! device, which maps the BCM GPIO registers without requiring root.
//!
//! ## Example Usage
//!
//! ```ignore
//! use fic_server::{pins::PinMap, server::Server};
//!
//! let pins = PinMap::default();
//! let gpio = GpioMemBackend::new("/dev/gpiomem", pins.managed_mask())?;
//! let server = Server::new(gpio, pins, Config::default());
//! server.listen("0.0.0.0:4000").await?;
//! ```
use std::{
    fs::OpenOptions,
    io,
    num::NonZero,
    path::Path,
    ptr::{NonNull, read_volatile, write_volatile},
};

use fic_server::Gpio;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

/// Function select registers, 10 pins of 3 bits each.
const GPFSEL0_OFFSET: usize = 0x00;
const GPSET0_OFFSET: usize = 0x1c;
const GPCLR0_OFFSET: usize = 0x28;
const GPLEV0_OFFSET: usize = 0x34;

const FSEL_INPUT: u32 = 0b000;
const FSEL_OUTPUT: u32 = 0b001;
const FSEL_MASK: u32 = 0b111;

const MAP_SIZE: NonZero<usize> = NonZero::new(0x1000).unwrap();

/// GPIO bank 0 mapped from `/dev/gpiomem`.
pub struct GpioMemBackend {
    regs: NonNull<u32>,
    /// Pins touched by [`Gpio::set_all_input`].
    managed: u32,
}

// SAFETY: the mapping is owned exclusively by this value and every write goes
// through &mut self.
unsafe impl Send for GpioMemBackend {}

impl GpioMemBackend {
    pub fn new(path: impl AsRef<Path>, managed: u32) -> io::Result<GpioMemBackend> {
        let device_path = path.as_ref();
        log::debug!("Opening GPIO memory device: {}", device_path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)?;

        let regs = unsafe {
            log::debug!("Mapping GPIO registers (size=0x{:x})", MAP_SIZE.get());
            let ptr = mmap(
                None,
                MAP_SIZE,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                0,
            )?;
            ptr.cast::<u32>()
        };
        log::info!("GPIO registers mapped from {}", device_path.display());
        Ok(GpioMemBackend { regs, managed })
    }

    fn read(&self, offset: usize) -> u32 {
        unsafe { read_volatile(self.regs.as_ptr().add(offset / 4)) }
    }

    fn write(&mut self, offset: usize, value: u32) {
        unsafe { write_volatile(self.regs.as_ptr().add(offset / 4), value) }
    }

    fn set_function(&mut self, pin: u32, function: u32) {
        let offset = GPFSEL0_OFFSET + (pin / 10) as usize * 4;
        let shift = (pin % 10) * 3;
        let value = self.read(offset) & !(FSEL_MASK << shift);
        self.write(offset, value | (function << shift));
    }
}

impl Drop for GpioMemBackend {
    fn drop(&mut self) {
        self.set_all_input();
        unsafe {
            let _ = munmap(self.regs.cast(), MAP_SIZE.get());
        }
    }
}

impl Gpio for GpioMemBackend {
    fn set_all_input(&mut self) {
        let managed = self.managed;
        for pin in (0..32).filter(|pin| managed & (1 << pin) != 0) {
            self.set_function(pin, FSEL_INPUT);
        }
    }

    fn set_input(&mut self, pin: u32) {
        self.set_function(pin, FSEL_INPUT);
    }

    fn set_output(&mut self, pin: u32) {
        self.set_function(pin, FSEL_OUTPUT);
    }

    fn set_bus(&mut self, mask: u32) {
        self.write(GPSET0_OFFSET, mask);
    }

    fn clr_bus(&mut self, mask: u32) {
        self.write(GPCLR0_OFFSET, mask);
    }

    fn get_bus(&self) -> u32 {
        self.read(GPLEV0_OFFSET)
    }
}
