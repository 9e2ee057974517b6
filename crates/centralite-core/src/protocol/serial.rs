//! Serial port handling
//!
//! Opens the RS-232 link to the panel. The panel always runs 19200 baud,
//! 8 data bits, no parity, one stop bit, no flow control.

use serialport::SerialPort;
use std::time::Duration;

use super::{ProtocolError, SerialLink, DEFAULT_BAUD_RATE};

/// Open a serial port configured for the panel
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    read_timeout: Duration,
) -> Result<SerialLink, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    tracing::info!("open_port: opening {} at {} baud", name, baud);

    let mut port = serialport::new(name, baud)
        .timeout(read_timeout)
        .open()
        .map_err(|e| ProtocolError::PortOpen {
            port: name.to_string(),
            reason: e.to_string(),
        })?;

    configure_port(port.as_mut())?;
    clear_buffers(port.as_mut())?;

    Ok(SerialLink::new(port))
}

/// Configure a serial port for 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}
