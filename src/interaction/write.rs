use anyhow::Result;

use super::{RequestPath, StatusCode};
use crate::tlv::Tag;

const TAG_WRITE_REQUESTS: u8 = 2;
const TAG_ATTRIBUTE_DATA_PATH: u8 = 1;
const TAG_WRITE_RESPONSES: u8 = 0;

/// All attributes are read only: every AttributeDataIB is answered with UnsupportedWrite.
pub fn handle_write_request(payload: &[u8]) -> Result<Vec<u8>> {
    let request = super::decode_request(payload)?;
    let writes = request
        .get_item(&[TAG_WRITE_REQUESTS])
        .map(|i| i.children())
        .unwrap_or(&[]);

    let mut tlv = super::response_writer();
    tlv.start_struct(Tag::Anonymous)?;
    tlv.start_array(TAG_WRITE_RESPONSES)?;
    for w in writes.iter().take(super::MAX_PATHS_PER_REQUEST) {
        let path = w
            .get_item(&[TAG_ATTRIBUTE_DATA_PATH])
            .map(RequestPath::from_tlv)
            .unwrap_or_default();
        log::debug!("write to {:?} rejected", path);
        // AttributeStatusIB {0: path, 1: status}
        tlv.start_struct(Tag::Anonymous)?;
        super::encode_path(&mut tlv, 0, &path)?;
        super::encode_status_ib(&mut tlv, 1, StatusCode::UnsupportedWrite)?;
        tlv.end_container()?;
    }
    tlv.end_container()?;
    tlv.end_container()?;
    Ok(tlv.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributePath;
    use crate::tlv::{self, TlvWriter};

    #[test]
    fn writes_are_rejected() {
        let mut tlv = TlvWriter::new();
        tlv.start_struct(Tag::Anonymous).unwrap();
        tlv.start_array(TAG_WRITE_REQUESTS).unwrap();
        for attr in [0u32, 2] {
            tlv.start_struct(Tag::Anonymous).unwrap();
            super::super::encode_path(&mut tlv, TAG_ATTRIBUTE_DATA_PATH, &AttributePath::new(1, 8, attr).into())
                .unwrap();
            tlv.write_uint(2, 50).unwrap();
            tlv.end_container().unwrap();
        }
        tlv.end_container().unwrap();
        tlv.end_container().unwrap();

        let resp = handle_write_request(tlv.as_slice()).unwrap();
        let t = tlv::decode_tlv(&resp).unwrap();
        let statuses = t.get_item(&[0]).unwrap().children();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1].get_u32(&[0, 4]), Some(2));
        assert_eq!(
            statuses[0].get_u8(&[1, 0]),
            Some(StatusCode::UnsupportedWrite as u8)
        );
    }
}
