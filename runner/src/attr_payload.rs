use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;

// From <sys/attr.h>.
pub const ATTR_BIT_MAP_COUNT: u16 = 5;
pub const ATTR_CMN_NAME: u32 = 0x0000_0001;
pub const ATTR_CMN_MODTIME: u32 = 0x0000_0400;
pub const ATTR_CMN_CHGTIME: u32 = 0x0000_0800;
pub const ATTR_FILE_TOTALSIZE: u32 = 0x0000_0002;

const NAME_BUFFER_LEN: usize = 256;

/// `struct attrlist`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrList {
    pub bitmapcount: u16,
    pub reserved: u16,
    pub commonattr: u32,
    pub volattr: u32,
    pub dirattr: u32,
    pub fileattr: u32,
    pub forkattr: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AttrPayloadKind {
    Cmn,
    CmnName,
    CmnTimes,
    FileSize,
}

impl AttrPayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttrPayloadKind::Cmn => "cmn",
            AttrPayloadKind::CmnName => "cmn-name",
            AttrPayloadKind::CmnTimes => "cmn-times",
            AttrPayloadKind::FileSize => "file-size",
        }
    }
}

/// Attribute selection plus the buffer getattrlist fills or setattrlist reads.
#[derive(Debug, Clone)]
pub struct AttrPayload {
    pub list: AttrList,
    pub buffer: Vec<u8>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl AttrPayload {
    pub fn build(kind: AttrPayloadKind) -> Self {
        let mut list = AttrList {
            bitmapcount: ATTR_BIT_MAP_COUNT,
            ..AttrList::default()
        };
        let buffer = match kind {
            AttrPayloadKind::Cmn | AttrPayloadKind::CmnName => {
                list.commonattr = ATTR_CMN_NAME;
                vec![0u8; NAME_BUFFER_LEN]
            }
            AttrPayloadKind::CmnTimes => {
                list.commonattr = ATTR_CMN_MODTIME | ATTR_CMN_CHGTIME;
                // Two timespecs { tv_sec, tv_nsec } in native layout.
                let now = now_secs();
                let mut buf = Vec::with_capacity(32);
                for _ in 0..2 {
                    buf.extend_from_slice(&now.to_ne_bytes());
                    buf.extend_from_slice(&0i64.to_ne_bytes());
                }
                buf
            }
            AttrPayloadKind::FileSize => {
                list.fileattr = ATTR_FILE_TOTALSIZE;
                0u64.to_ne_bytes().to_vec()
            }
        };
        AttrPayload { list, buffer }
    }
}
