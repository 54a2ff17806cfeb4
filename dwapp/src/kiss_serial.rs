//! A radio channel backed by a real serial TNC/modem, with PTT driven by
//! RTS or DTR. Grounded directly on the teacher's `SerialPtt`.

use std::io::{Read, Write};

use serialport::SerialPort;

use crate::channel_io::ChannelIo;
use crate::error::TncError;

/// Which serial control line keys PTT.
#[derive(Debug, Clone, Copy)]
pub enum PttPin {
    Rts,
    Dtr,
}

pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    pin: PttPin,
}

impl SerialChannel {
    pub fn available_ports() -> impl Iterator<Item = String> {
        serialport::available_ports()
            .unwrap_or_default()
            .into_iter()
            .map(|i| i.port_name)
    }

    pub fn open(port_name: &str, baud: u32, pin: PttPin) -> Result<Self, TncError> {
        let port = serialport::new(port_name, baud).open()?;
        let mut chan = Self { port, pin };
        chan.ptt(false)?;
        Ok(chan)
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

impl ChannelIo for SerialChannel {
    fn try_clone(&mut self) -> Result<Self, TncError> {
        Ok(Self {
            port: self.port.try_clone()?,
            pin: self.pin,
        })
    }

    fn ptt(&mut self, on: bool) -> Result<(), TncError> {
        match self.pin {
            PttPin::Rts => self.port.write_request_to_send(on)?,
            PttPin::Dtr => self.port.write_data_terminal_ready(on)?,
        }
        Ok(())
    }

    fn dcd(&self) -> bool {
        self.port.read_carrier_detect().unwrap_or(false)
    }
}
