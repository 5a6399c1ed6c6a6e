//! Fixed-layout wire structs and command opcodes.
//!
//! All multi-byte integers are little-endian. Layouts are frozen; the
//! firmware reads these structs byte-for-byte.

/// Framed single-byte command: abort an in-flight capture.
pub const CMD_STOP: u8 = 0xFF;
/// Framed single-byte command: jump to the bootloader (terminal until reset).
pub const CMD_BOOTLOADER: u8 = 0xBB;
/// Command prefix byte followed by a [`NetConfig`] payload.
pub const CMD_NET_CONFIG: u8 = 0xCC;

/// Device status byte meaning "accepted".
pub const STATUS_ACK: u8 = 0x00;

/// Wire-level capture request, 45 bytes.
///
/// ```text
/// offset  size  field
/// 0       1     trigger_type       0=Edge 1=Complex 2=Fast 3=Blast
/// 1       1     trigger            channel index
/// 2       1     inverted_or_count  edge inversion flag / pattern bit count
/// 3       2     trigger_value      pattern word
/// 5       24    channels           1 = active, by channel index
/// 29      1     channel_count
/// 30      4     frequency          Hz
/// 34      4     pre_samples
/// 38      4     post_samples
/// 42      1     loop_count
/// 43      1     measure
/// 44      1     capture_mode       0=8ch 1=16ch 2=24ch
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub trigger_type: u8,
    pub trigger: u8,
    pub inverted_or_count: u8,
    pub trigger_value: u16,
    pub channels: [u8; 24],
    pub channel_count: u8,
    pub frequency: u32,
    pub pre_samples: u32,
    pub post_samples: u32,
    pub loop_count: u8,
    pub measure: u8,
    pub capture_mode: u8,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            trigger_type: 0,
            trigger: 0,
            inverted_or_count: 0,
            trigger_value: 0,
            channels: [0; 24],
            channel_count: 0,
            frequency: 0,
            pre_samples: 0,
            post_samples: 0,
            loop_count: 0,
            measure: 0,
            capture_mode: 0,
        }
    }
}

impl CaptureRequest {
    pub const SIZE: usize = 45;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.trigger_type;
        buf[1] = self.trigger;
        buf[2] = self.inverted_or_count;
        buf[3..5].copy_from_slice(&self.trigger_value.to_le_bytes());
        buf[5..29].copy_from_slice(&self.channels);
        buf[29] = self.channel_count;
        buf[30..34].copy_from_slice(&self.frequency.to_le_bytes());
        buf[34..38].copy_from_slice(&self.pre_samples.to_le_bytes());
        buf[38..42].copy_from_slice(&self.post_samples.to_le_bytes());
        buf[42] = self.loop_count;
        buf[43] = self.measure;
        buf[44] = self.capture_mode;
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let mut channels = [0u8; 24];
        channels.copy_from_slice(&data[5..29]);
        Some(Self {
            trigger_type: data[0],
            trigger: data[1],
            inverted_or_count: data[2],
            trigger_value: u16::from_le_bytes([data[3], data[4]]),
            channels,
            channel_count: data[29],
            frequency: u32::from_le_bytes([data[30], data[31], data[32], data[33]]),
            pre_samples: u32::from_le_bytes([data[34], data[35], data[36], data[37]]),
            post_samples: u32::from_le_bytes([data[38], data[39], data[40], data[41]]),
            loop_count: data[42],
            measure: data[43],
            capture_mode: data[44],
        })
    }
}

/// Network settings pushed to WiFi-capable devices, 114 bytes.
///
/// Strings are NUL-padded fixed fields; oversize values are silently
/// truncated to the field width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetConfig {
    pub access_point_name: String,
    pub password: String,
    pub ip_address: String,
    pub port: u16,
}

const AP_NAME_LEN: usize = 32;
const PASSWORD_LEN: usize = 64;
const IP_ADDRESS_LEN: usize = 16;

impl NetConfig {
    pub const SIZE: usize = AP_NAME_LEN + PASSWORD_LEN + IP_ADDRESS_LEN + 2;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        pack_str(&mut buf[0..AP_NAME_LEN], &self.access_point_name);
        pack_str(&mut buf[32..32 + PASSWORD_LEN], &self.password);
        pack_str(&mut buf[96..96 + IP_ADDRESS_LEN], &self.ip_address);
        buf[112..114].copy_from_slice(&self.port.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            access_point_name: unpack_str(&data[0..AP_NAME_LEN]),
            password: unpack_str(&data[32..96]),
            ip_address: unpack_str(&data[96..112]),
            port: u16::from_le_bytes([data[112], data[113]]),
        })
    }
}

fn pack_str(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

fn unpack_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_request_size() {
        assert_eq!(CaptureRequest::SIZE, 45);
        assert_eq!(CaptureRequest::default().encode().len(), 45);
    }

    #[test]
    fn test_capture_request_layout() {
        let mut request = CaptureRequest {
            trigger_type: 2,
            trigger: 5,
            inverted_or_count: 3,
            trigger_value: 0xBEEF,
            channel_count: 8,
            frequency: 24_000_000,
            pre_samples: 1_000,
            post_samples: 9_000,
            loop_count: 4,
            measure: 1,
            capture_mode: 0,
            ..Default::default()
        };
        for i in 0..8 {
            request.channels[i] = 1;
        }

        let buf = request.encode();
        assert_eq!(buf[0], 2);
        assert_eq!(buf[1], 5);
        assert_eq!(buf[2], 3);
        assert_eq!(u16::from_le_bytes([buf[3], buf[4]]), 0xBEEF);
        assert_eq!(&buf[5..13], &[1u8; 8]);
        assert_eq!(&buf[13..29], &[0u8; 16]);
        assert_eq!(buf[29], 8);
        assert_eq!(
            u32::from_le_bytes([buf[30], buf[31], buf[32], buf[33]]),
            24_000_000
        );
        assert_eq!(u32::from_le_bytes([buf[34], buf[35], buf[36], buf[37]]), 1_000);
        assert_eq!(u32::from_le_bytes([buf[38], buf[39], buf[40], buf[41]]), 9_000);
        assert_eq!(buf[42], 4);
        assert_eq!(buf[43], 1);
        assert_eq!(buf[44], 0);
    }

    #[test]
    fn test_capture_request_round_trip() {
        let mut request = CaptureRequest {
            trigger_type: 1,
            trigger: 2,
            trigger_value: 0x0155,
            frequency: 100_000_000,
            pre_samples: 2,
            post_samples: 512,
            capture_mode: 2,
            ..Default::default()
        };
        request.channels[0] = 1;
        request.channels[23] = 1;
        request.channel_count = 2;

        let decoded = CaptureRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
        assert!(CaptureRequest::decode(&[0u8; 44]).is_none());
    }

    #[test]
    fn test_net_config_layout() {
        let config = NetConfig {
            access_point_name: "lab-ap".to_string(),
            password: "hunter2".to_string(),
            ip_address: "192.168.1.42".to_string(),
            port: 4045,
        };
        let buf = config.encode();
        assert_eq!(buf.len(), 114);
        assert_eq!(&buf[0..6], b"lab-ap");
        assert_eq!(buf[6], 0);
        assert_eq!(&buf[32..39], b"hunter2");
        assert_eq!(&buf[96..108], b"192.168.1.42");
        assert_eq!(u16::from_le_bytes([buf[112], buf[113]]), 4045);

        assert_eq!(NetConfig::decode(&buf).unwrap(), config);
    }

    #[test]
    fn test_net_config_truncates_oversize() {
        let config = NetConfig {
            access_point_name: "x".repeat(40),
            password: String::new(),
            ip_address: "255.255.255.255!".to_string() + "overflow",
            port: 1,
        };
        let decoded = NetConfig::decode(&config.encode()).unwrap();
        assert_eq!(decoded.access_point_name.len(), 32);
        assert_eq!(decoded.ip_address.len(), 16);
    }
}
