//! 目录流格式（版本 1）
//!
//! 所有整数均为大端：
//!
//! ```text
//! 流头:   "SRNT" | version: u8 | entry_count: u64 | total_bytes: u64
//! 条目:   kind: u8 | path_len: u16 | path (UTF-8, '/' 分隔)
//! 文件:   ... | size: u64 | size 字节内容
//! ```
//!
//! 流的结束由明文结束表示，没有单独的结束记录。

use crate::error::{Result, TransferError};
use std::path::{Component, Path, PathBuf};

pub const MAGIC: [u8; 4] = *b"SRNT";
pub const VERSION: u8 = 1;
pub const MAX_PATH_LEN: usize = 4096;

/// 流头长度
pub const STREAM_HEADER_LEN: usize = 4 + 1 + 8 + 8;
/// 条目头定长部分：kind + path_len
pub const ENTRY_PREFIX_LEN: usize = 1 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub entry_count: u64,
    pub total_bytes: u64,
}

impl StreamHeader {
    pub fn encode(&self) -> [u8; STREAM_HEADER_LEN] {
        let mut out = [0u8; STREAM_HEADER_LEN];
        out[..4].copy_from_slice(&MAGIC);
        out[4] = VERSION;
        out[5..13].copy_from_slice(&self.entry_count.to_be_bytes());
        out[13..].copy_from_slice(&self.total_bytes.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8; STREAM_HEADER_LEN]) -> Result<Self> {
        if bytes[..4] != MAGIC {
            return Err(TransferError::Protocol("bad stream magic".into()));
        }
        if bytes[4] != VERSION {
            return Err(TransferError::Protocol(format!(
                "unsupported stream version {}",
                bytes[4]
            )));
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[5..13]);
        let mut total = [0u8; 8];
        total.copy_from_slice(&bytes[13..]);
        Ok(Self {
            entry_count: u64::from_be_bytes(count),
            total_bytes: u64::from_be_bytes(total),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory = 1,
    File = 2,
}

impl EntryKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(EntryKind::Directory),
            2 => Ok(EntryKind::File),
            other => Err(TransferError::Protocol(format!("unknown entry kind {other}"))),
        }
    }
}

/// 条目头（不含文件内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: EntryKind,
    pub path: String,
    /// 目录为 0
    pub size: u64,
}

impl EntryHeader {
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Directory,
            path: path.into(),
            size: 0,
        }
    }

    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            kind: EntryKind::File,
            path: path.into(),
            size,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        sanitize_relative_path(&self.path)?;
        // sanitize 已保证长度 <= MAX_PATH_LEN
        let path_len = u16::try_from(self.path.len())
            .map_err(|_| TransferError::InvalidPath(self.path.clone()))?;

        let mut out = Vec::with_capacity(ENTRY_PREFIX_LEN + self.path.len() + 8);
        out.push(self.kind as u8);
        out.extend_from_slice(&path_len.to_be_bytes());
        out.extend_from_slice(self.path.as_bytes());
        if self.kind == EntryKind::File {
            out.extend_from_slice(&self.size.to_be_bytes());
        }
        Ok(out)
    }

    /// 解析定长前缀，返回条目类型与路径长度
    pub fn decode_prefix(bytes: &[u8; ENTRY_PREFIX_LEN]) -> Result<(EntryKind, usize)> {
        let kind = EntryKind::from_u8(bytes[0])?;
        let len = usize::from(u16::from_be_bytes([bytes[1], bytes[2]]));
        if len == 0 || len > MAX_PATH_LEN {
            return Err(TransferError::Protocol(format!("invalid path length {len}")));
        }
        Ok((kind, len))
    }
}

/// 校验并转换相对路径
///
/// 拒绝空路径、绝对路径、`.`/`..`/空组件、反斜杠和 NUL，
/// 保证结果 join 到目标根目录后不会逃逸。
pub fn sanitize_relative_path(path: &str) -> Result<PathBuf> {
    let invalid = || TransferError::InvalidPath(path.to_string());

    if path.is_empty() || path.len() > MAX_PATH_LEN {
        return Err(invalid());
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(invalid());
    }

    let mut out = PathBuf::new();
    for part in path.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(invalid());
        }
        // 逐段再经过 Path 解析，拦截平台相关的前缀
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => out.push(name),
            _ => return Err(invalid()),
        }
    }
    Ok(out)
}
