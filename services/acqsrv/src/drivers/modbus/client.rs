//! Modbus TCP client
//!
//! Owns one TCP connection to a device or gateway. Requests are framed with
//! an MBAP header, matched to responses by transaction id, and bounded by
//! the device's configured timeout; exceeding it is a transport failure,
//! never a silent missing-data case.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::drivers::modbus::pdu::{self, ResponsePdu};
use crate::error::{AcqSrvError, Result};

/// MBAP header length: transaction id (2) + protocol id (2) + length (2) + unit id (1)
const MBAP_HEADER_LEN: usize = 7;

/// Maximum response PDU we will accept (253 bytes per the Modbus spec, rounded up)
const MAX_PDU_LEN: usize = 256;

/// Modbus TCP client owning one connection
pub struct ModbusTcpClient {
    endpoint: String,
    unit_id: u8,
    timeout: Duration,
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl ModbusTcpClient {
    pub fn new(endpoint: String, unit_id: u8, timeout: Duration) -> Self {
        Self {
            endpoint,
            unit_id,
            timeout,
            stream: None,
            transaction_id: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Establish the TCP connection
    pub async fn connect(&mut self) -> Result<()> {
        let stream = timeout(self.timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| {
                AcqSrvError::timeout(format!("Connect to {} timed out", self.endpoint))
            })?
            .map_err(|e| AcqSrvError::connection(format!("Connect to {}: {}", self.endpoint, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| AcqSrvError::connection(format!("set_nodelay: {}", e)))?;
        debug!(endpoint = %self.endpoint, "modbus tcp connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Drop the connection
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(endpoint = %self.endpoint, "modbus tcp disconnected");
        }
        Ok(())
    }

    /// Read registers via 0x03/0x04
    pub async fn read_registers(
        &mut self,
        function_code: u8,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        let request = pdu::build_read_request(function_code, start_address, quantity);
        match self.request(&request).await? {
            ResponsePdu::ReadRegisters(words) if words.len() >= quantity as usize => {
                Ok(words.into_iter().take(quantity as usize).collect())
            },
            ResponsePdu::ReadRegisters(words) => Err(AcqSrvError::protocol(format!(
                "Short register response: expected {}, got {}",
                quantity,
                words.len()
            ))),
            other => Err(unexpected_response(function_code, &other)),
        }
    }

    /// Read coils/discrete inputs via 0x01/0x02
    pub async fn read_bits(
        &mut self,
        function_code: u8,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>> {
        let request = pdu::build_read_request(function_code, start_address, quantity);
        match self.request(&request).await? {
            ResponsePdu::ReadBits(bits) if bits.len() >= quantity as usize => {
                Ok(bits.into_iter().take(quantity as usize).collect())
            },
            ResponsePdu::ReadBits(bits) => Err(AcqSrvError::protocol(format!(
                "Short bit response: expected {}, got {}",
                quantity,
                bits.len()
            ))),
            other => Err(unexpected_response(function_code, &other)),
        }
    }

    /// Write a single coil via 0x05
    pub async fn write_single_coil(&mut self, address: u16, value: bool) -> Result<()> {
        let request = pdu::build_write_single_coil(address, value);
        match self.request(&request).await? {
            ResponsePdu::WriteSingleAck { .. } => Ok(()),
            other => Err(unexpected_response(0x05, &other)),
        }
    }

    /// Write a single register via 0x06
    pub async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        let request = pdu::build_write_single_register(address, value);
        match self.request(&request).await? {
            ResponsePdu::WriteSingleAck { .. } => Ok(()),
            other => Err(unexpected_response(0x06, &other)),
        }
    }

    /// Write multiple coils via 0x0F
    pub async fn write_multiple_coils(&mut self, address: u16, values: &[bool]) -> Result<()> {
        let request = pdu::build_write_multiple_coils(address, values);
        match self.request(&request).await? {
            ResponsePdu::WriteMultipleAck { .. } => Ok(()),
            other => Err(unexpected_response(0x0F, &other)),
        }
    }

    /// Write multiple registers via 0x10
    pub async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let request = pdu::build_write_multiple_registers(address, values);
        match self.request(&request).await? {
            ResponsePdu::WriteMultipleAck { .. } => Ok(()),
            other => Err(unexpected_response(0x10, &other)),
        }
    }

    /// Send one request PDU and await its matched response PDU
    async fn request(&mut self, request_pdu: &[u8]) -> Result<ResponsePdu> {
        let transaction_id = self.next_transaction_id();
        let frame = self.build_frame(transaction_id, request_pdu);

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(AcqSrvError::not_connected)?;

        trace!(
            transaction_id,
            len = frame.len(),
            "sending modbus tcp frame"
        );

        let result = timeout(self.timeout, async {
            stream.write_all(&frame).await?;

            // MBAP header first, then exactly the advertised remainder
            let mut header = [0u8; MBAP_HEADER_LEN];
            stream.read_exact(&mut header).await?;

            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            if length < 2 || length > MAX_PDU_LEN {
                return Err(std::io::Error::other(format!(
                    "Invalid MBAP length field: {}",
                    length
                )));
            }

            let mut body = vec![0u8; length - 1];
            stream.read_exact(&mut body).await?;
            Ok::<_, std::io::Error>((header, body))
        })
        .await;

        let (header, body) = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                // Connection is unusable after an I/O error mid-frame
                self.stream = None;
                return Err(AcqSrvError::io(format!("Modbus TCP I/O: {}", e)));
            },
            Err(_) => {
                self.stream = None;
                return Err(AcqSrvError::timeout(format!(
                    "Request to {} timed out after {:?}",
                    self.endpoint, self.timeout
                )));
            },
        };

        let response_tid = u16::from_be_bytes([header[0], header[1]]);
        if response_tid != transaction_id {
            self.stream = None;
            return Err(AcqSrvError::protocol(format!(
                "Transaction id mismatch: sent {}, received {}",
                transaction_id, response_tid
            )));
        }

        pdu::parse_response(&body)
    }

    fn build_frame(&self, transaction_id: u16, request_pdu: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + request_pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00]); // protocol id
        frame.extend_from_slice(&((request_pdu.len() + 1) as u16).to_be_bytes());
        frame.push(self.unit_id);
        frame.extend_from_slice(request_pdu);
        frame
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }
}

fn unexpected_response(function_code: u8, response: &ResponsePdu) -> AcqSrvError {
    AcqSrvError::protocol(format!(
        "Unexpected response to function 0x{:02X}: {:?}",
        function_code, response
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal single-shot Modbus TCP responder for client tests
    async fn spawn_responder<F>(respond: F) -> String
    where
        F: Fn(u16, &[u8]) -> Vec<u8> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            loop {
                let mut header = [0u8; MBAP_HEADER_LEN];
                if socket.read_exact(&mut header).await.is_err() {
                    return;
                }
                let tid = u16::from_be_bytes([header[0], header[1]]);
                let length = u16::from_be_bytes([header[4], header[5]]) as usize;
                let mut body = vec![0u8; length - 1];
                socket.read_exact(&mut body).await.unwrap();

                let response_pdu = respond(tid, &body);
                let mut frame = Vec::new();
                frame.extend_from_slice(&tid.to_be_bytes());
                frame.extend_from_slice(&[0x00, 0x00]);
                frame.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
                frame.push(header[6]);
                frame.extend_from_slice(&response_pdu);
                socket.write_all(&frame).await.unwrap();
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_read_registers_round_trip() {
        let endpoint = spawn_responder(|_tid, request| {
            assert_eq!(request[0], 0x03);
            vec![0x03, 0x04, 0x41, 0xC8, 0x00, 0x00]
        })
        .await;

        let mut client = ModbusTcpClient::new(endpoint, 1, Duration::from_secs(1));
        client.connect().await.unwrap();
        let words = client.read_registers(0x03, 0, 2).await.unwrap();
        assert_eq!(words, vec![0x41C8, 0x0000]);
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_exception_surfaces_as_protocol_error() {
        let endpoint = spawn_responder(|_tid, _request| vec![0x83, 0x02]).await;

        let mut client = ModbusTcpClient::new(endpoint, 1, Duration::from_secs(1));
        client.connect().await.unwrap();
        let err = client.read_registers(0x03, 0, 2).await.unwrap_err();
        assert!(matches!(err, AcqSrvError::ProtocolError(_)));
        assert!(err.to_string().contains("Illegal data address"));
    }

    #[tokio::test]
    async fn test_request_requires_connection() {
        let mut client =
            ModbusTcpClient::new("127.0.0.1:1".to_string(), 1, Duration::from_millis(100));
        let err = client.read_registers(0x03, 0, 1).await.unwrap_err();
        assert!(matches!(err, AcqSrvError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_write_single_register() {
        let endpoint = spawn_responder(|_tid, request| {
            assert_eq!(request, [0x06, 0x00, 0x05, 0x02, 0x8A].as_slice());
            request.to_vec()
        })
        .await;

        let mut client = ModbusTcpClient::new(endpoint, 1, Duration::from_secs(1));
        client.connect().await.unwrap();
        client.write_single_register(5, 0x028A).await.unwrap();
    }
}
