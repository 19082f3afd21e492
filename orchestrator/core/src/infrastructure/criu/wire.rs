// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! CRIU RPC messages
//!
//! Hand-declared subset of CRIU's `rpc.proto` (proto2). Tag numbers match the
//! upstream schema so frames interoperate with a stock `criu service`.

/// `criu_req_type`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CriuReqType {
    Empty = 0,
    Dump = 1,
    Restore = 2,
    Check = 3,
    PreDump = 4,
    PageServer = 5,
    Notify = 6,
    Version = 10,
}

/// `criu_opts`
#[derive(Clone, PartialEq, prost::Message)]
pub struct CriuOpts {
    #[prost(int32, required, tag = "1")]
    pub images_dir_fd: i32,
    #[prost(int32, optional, tag = "2")]
    pub pid: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub leave_running: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub ext_unix_sk: Option<bool>,
    #[prost(bool, optional, tag = "5")]
    pub tcp_established: Option<bool>,
    #[prost(bool, optional, tag = "7")]
    pub shell_job: Option<bool>,
    #[prost(bool, optional, tag = "8")]
    pub file_locks: Option<bool>,
    #[prost(int32, optional, tag = "9")]
    pub log_level: Option<i32>,
    #[prost(string, optional, tag = "10")]
    pub log_file: Option<String>,
    #[prost(bool, optional, tag = "12")]
    pub notify_scripts: Option<bool>,
    #[prost(string, optional, tag = "13")]
    pub root: Option<String>,
    #[prost(string, optional, tag = "14")]
    pub parent_img: Option<String>,
    #[prost(bool, optional, tag = "15")]
    pub track_mem: Option<bool>,
    #[prost(int32, optional, tag = "17")]
    pub work_dir_fd: Option<i32>,
    #[prost(bool, optional, tag = "26")]
    pub rst_sibling: Option<bool>,
    #[prost(string, repeated, tag = "37")]
    pub external: Vec<String>,
}

/// `criu_req`
#[derive(Clone, PartialEq, prost::Message)]
pub struct CriuReq {
    #[prost(enumeration = "CriuReqType", required, tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub opts: Option<CriuOpts>,
    #[prost(bool, optional, tag = "3")]
    pub notify_success: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub keep_open: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    pub pid: Option<i32>,
}

/// `criu_dump_resp`
#[derive(Clone, PartialEq, prost::Message)]
pub struct CriuDumpResp {
    #[prost(bool, optional, tag = "1")]
    pub restored: Option<bool>,
}

/// `criu_restore_resp`
#[derive(Clone, PartialEq, prost::Message)]
pub struct CriuRestoreResp {
    #[prost(int32, required, tag = "1")]
    pub pid: i32,
}

/// `criu_notify`
#[derive(Clone, PartialEq, prost::Message)]
pub struct CriuNotify {
    #[prost(string, optional, tag = "1")]
    pub script: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub pid: Option<i32>,
}

/// `criu_resp`
#[derive(Clone, PartialEq, prost::Message)]
pub struct CriuResp {
    #[prost(enumeration = "CriuReqType", required, tag = "1")]
    pub r#type: i32,
    #[prost(bool, required, tag = "2")]
    pub success: bool,
    #[prost(message, optional, tag = "3")]
    pub dump: Option<CriuDumpResp>,
    #[prost(message, optional, tag = "4")]
    pub restore: Option<CriuRestoreResp>,
    #[prost(message, optional, tag = "5")]
    pub notify: Option<CriuNotify>,
    #[prost(int32, optional, tag = "7")]
    pub cr_errno: Option<i32>,
    #[prost(string, optional, tag = "9")]
    pub cr_errmsg: Option<String>,
}

impl CriuResp {
    pub fn req_type(&self) -> Option<CriuReqType> {
        CriuReqType::try_from(self.r#type).ok()
    }

    pub fn notify_script(&self) -> Option<&str> {
        self.notify.as_ref().and_then(|n| n.script.as_deref())
    }

    pub fn error_summary(&self) -> String {
        match (&self.cr_errmsg, self.cr_errno) {
            (Some(msg), Some(errno)) => format!("{} (errno {})", msg, errno),
            (Some(msg), None) => msg.clone(),
            (None, Some(errno)) => format!("errno {}", errno),
            (None, None) => "no details reported".to_string(),
        }
    }
}

impl CriuReq {
    pub fn notify_ack() -> Self {
        Self {
            r#type: CriuReqType::Notify as i32,
            opts: None,
            notify_success: Some(true),
            keep_open: None,
            pid: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_notify_ack_encoding() {
        // type=6 (field 1 varint), notify_success=true (field 3 varint)
        assert_eq!(CriuReq::notify_ack().encode_to_vec(), vec![0x08, 0x06, 0x18, 0x01]);
    }

    #[test]
    fn test_decode_notify_response() {
        let resp = CriuResp {
            r#type: CriuReqType::Notify as i32,
            success: true,
            notify: Some(CriuNotify {
                script: Some("post-dump".to_string()),
                pid: None,
            }),
            ..Default::default()
        };
        let decoded = CriuResp::decode(resp.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.req_type(), Some(CriuReqType::Notify));
        assert_eq!(decoded.notify_script(), Some("post-dump"));
    }

    #[test]
    fn test_error_summary() {
        let resp = CriuResp {
            r#type: CriuReqType::Dump as i32,
            success: false,
            cr_errno: Some(16),
            cr_errmsg: Some("Device busy".to_string()),
            ..Default::default()
        };
        assert_eq!(resp.error_summary(), "Device busy (errno 16)");
    }
}
