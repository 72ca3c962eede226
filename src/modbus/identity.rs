//! Static device identification answered through function 0x2B / MEI 0x0E.

use serde::{Deserialize, Serialize};

use super::protocol::Response;
use crate::utils::error::{SlaveError, SlaveResult};

pub const READ_BASIC: u8 = 0x01;
pub const READ_REGULAR: u8 = 0x02;
pub const READ_EXTENDED: u8 = 0x03;
pub const READ_SPECIFIC: u8 = 0x04;

/// Regular identification, stream and individual access.
const CONFORMITY_LEVEL: u8 = 0x82;
const LAST_BASIC_OBJECT: u8 = 0x02;
const LAST_REGULAR_OBJECT: u8 = 0x06;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub vendor_name: String,
    pub product_code: String,
    pub major_minor_revision: String,
    pub vendor_url: String,
    pub product_name: String,
    pub model_name: String,
    pub user_application_name: String,
}

/// Defaults reproduce the identification of the deployed device.
impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_name: "pymodbus".to_string(),
            product_code: "PM".to_string(),
            major_minor_revision: "1.0".to_string(),
            vendor_url: "http://github.com/bashwork/pymodbus/".to_string(),
            product_name: "pymodbus Server".to_string(),
            model_name: "pymodbus Server".to_string(),
            user_application_name: String::new(),
        }
    }
}

impl DeviceIdentity {
    pub fn object(&self, id: u8) -> Option<&str> {
        let value = match id {
            0x00 => &self.vendor_name,
            0x01 => &self.product_code,
            0x02 => &self.major_minor_revision,
            0x03 => &self.vendor_url,
            0x04 => &self.product_name,
            0x05 => &self.model_name,
            0x06 => &self.user_application_name,
            _ => return None,
        };
        // Basic objects are mandatory and reported even when empty.
        if value.is_empty() && id > LAST_BASIC_OBJECT {
            None
        } else {
            Some(value.as_str())
        }
    }

    /// Build the response for a Read Device Identification request.
    ///
    /// Stream reads start at `object_id`, falling back to the first object of
    /// the category when it is out of range. Everything fits in one response,
    /// so `more_follows` is always false.
    pub fn read(&self, read_code: u8, object_id: u8) -> SlaveResult<Response> {
        let objects: Vec<(u8, Vec<u8>)> = match read_code {
            READ_BASIC | READ_REGULAR | READ_EXTENDED => {
                let last = if read_code == READ_BASIC {
                    LAST_BASIC_OBJECT
                } else {
                    LAST_REGULAR_OBJECT
                };
                let first = if object_id <= last { object_id } else { 0 };
                (first..=last)
                    .filter_map(|id| self.object(id).map(|v| (id, clip(v))))
                    .collect()
            }
            READ_SPECIFIC => {
                let value = self
                    .object(object_id)
                    .ok_or(SlaveError::UnknownObject(object_id))?;
                vec![(object_id, clip(value))]
            }
            other => {
                return Err(SlaveError::IllegalDataValue(format!(
                    "device id read code 0x{:02X}",
                    other
                )))
            }
        };

        Ok(Response::ReadDeviceIdentification {
            read_code,
            conformity_level: CONFORMITY_LEVEL,
            more_follows: false,
            next_object_id: 0,
            objects,
        })
    }
}

/// Object values travel with a one-byte length and share a 253-byte PDU.
fn clip(value: &str) -> Vec<u8> {
    value.as_bytes().iter().take(32).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(response: &Response) -> Vec<u8> {
        match response {
            Response::ReadDeviceIdentification { objects, .. } => {
                objects.iter().map(|(id, _)| *id).collect()
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_defaults_match_deployed_device() {
        let identity = DeviceIdentity::default();
        assert_eq!(identity.object(0x00), Some("pymodbus"));
        assert_eq!(identity.object(0x01), Some("PM"));
        assert_eq!(identity.object(0x02), Some("1.0"));
        assert_eq!(identity.object(0x03), Some("http://github.com/bashwork/pymodbus/"));
        assert_eq!(identity.object(0x05), Some("pymodbus Server"));
        assert_eq!(identity.object(0x06), None);
    }

    #[test]
    fn test_basic_stream_returns_mandatory_objects() {
        let identity = DeviceIdentity::default();
        let response = identity.read(READ_BASIC, 0).unwrap();
        assert_eq!(ids(&response), vec![0, 1, 2]);
    }

    #[test]
    fn test_regular_stream_skips_empty_optional_objects() {
        let identity = DeviceIdentity::default();
        let response = identity.read(READ_REGULAR, 0).unwrap();
        assert_eq!(ids(&response), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_out_of_range_stream_start_restarts_at_zero() {
        let identity = DeviceIdentity::default();
        let response = identity.read(READ_BASIC, 0x05).unwrap();
        assert_eq!(ids(&response), vec![0, 1, 2]);
    }

    #[test]
    fn test_specific_object() {
        let identity = DeviceIdentity::default();
        let response = identity.read(READ_SPECIFIC, 0x04).unwrap();
        match response {
            Response::ReadDeviceIdentification { objects, .. } => {
                assert_eq!(objects, vec![(0x04, b"pymodbus Server".to_vec())]);
            }
            other => panic!("unexpected response {:?}", other),
        }
        assert!(matches!(
            identity.read(READ_SPECIFIC, 0x06),
            Err(SlaveError::UnknownObject(0x06))
        ));
    }

    #[test]
    fn test_bad_read_code() {
        let identity = DeviceIdentity::default();
        assert!(matches!(identity.read(0x09, 0), Err(SlaveError::IllegalDataValue(_))));
    }
}
