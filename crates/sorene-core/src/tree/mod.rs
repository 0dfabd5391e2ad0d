//! 目录树序列化
//!
//! - **protocol**: 目录流格式与路径校验
//! - **frames**: 字节流与通道帧之间的适配
//! - **reader**: 发送端，遍历目录写入通道
//! - **writer**: 接收端，从通道还原目录

pub mod frames;
pub mod protocol;
pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};

pub use protocol::{EntryHeader, EntryKind, StreamHeader, sanitize_relative_path};
pub use reader::DirectoryReader;
pub use writer::DirectoryWriter;

/// 一次传输处理的条目统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BufferPool, Channel, ProgressTracker};
    use std::path::Path;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn build_tree(root: &Path) {
        std::fs::create_dir_all(root.join("docs/empty")).unwrap();
        std::fs::write(root.join("docs/readme.md"), b"# sorene").unwrap();
        std::fs::write(root.join("zero.bin"), b"").unwrap();
        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(root.join("big.bin"), big).unwrap();
    }

    #[tokio::test]
    async fn test_reader_to_writer_reproduces_tree() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        build_tree(src.path());

        // 小容量通道迫使两端交替阻塞
        let channel = Arc::new(Channel::new(8 * 1024).unwrap());
        let pool = Arc::new(BufferPool::new(4 * 1024));
        let cancel = CancellationToken::new();

        let reader = DirectoryReader::new(
            src.path(),
            vec![],
            channel.clone(),
            pool.clone(),
            Arc::new(ProgressTracker::new()),
            cancel.child_token(),
        )
        .spawn();
        let writer = DirectoryWriter::new(
            dst.path(),
            channel,
            pool,
            Arc::new(ProgressTracker::new()),
            cancel.child_token(),
        )
        .spawn();

        let sent = reader.await.unwrap().unwrap();
        let received = writer.await.unwrap().unwrap();
        assert_eq!(sent, received);
        assert_eq!(
            received,
            TreeStats {
                files: 3,
                directories: 2,
                bytes: 200_008,
            }
        );

        for name in ["docs/readme.md", "zero.bin", "big.bin"] {
            assert_eq!(
                std::fs::read(src.path().join(name)).unwrap(),
                std::fs::read(dst.path().join(name)).unwrap(),
                "{name} differs"
            );
        }
        assert!(dst.path().join("docs/empty").is_dir());
    }
}
