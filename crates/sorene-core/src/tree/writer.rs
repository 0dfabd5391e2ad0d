//! 接收端目录写入任务
//!
//! 从通道消费目录流，在目标根目录下还原文件和目录。
//! 每个路径在触碰文件系统之前都经过 [`sanitize_relative_path`] 校验。

use super::TreeStats;
use super::frames::FrameSource;
use super::protocol::{
    ENTRY_PREFIX_LEN, EntryHeader, EntryKind, STREAM_HEADER_LEN, StreamHeader,
    sanitize_relative_path,
};
use crate::error::{Result, TransferError};
use crate::io::{BufferPool, Channel, ProgressTracker};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct DirectoryWriter {
    dest: PathBuf,
    channel: Arc<Channel>,
    pool: Arc<BufferPool>,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
}

impl DirectoryWriter {
    pub fn new(
        dest: impl Into<PathBuf>,
        channel: Arc<Channel>,
        pool: Arc<BufferPool>,
        progress: Arc<ProgressTracker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dest: dest.into(),
            channel,
            pool,
            progress,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<TreeStats>> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> Result<TreeStats> {
        let mut source = FrameSource::new(self.channel.clone(), self.pool.clone());
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(TransferError::Cancelled),
            r = self.consume(&mut source) => r,
        };
        source.release();
        // 失败时关闭通道，唤醒阻塞在写入上的网络循环
        self.channel.close();
        match &result {
            Ok(stats) => info!(
                "Directory writer finished: {} files, {} dirs, {} bytes",
                stats.files, stats.directories, stats.bytes
            ),
            Err(e) => warn!("Directory writer failed: {}", e),
        }
        result
    }

    async fn consume(&self, source: &mut FrameSource) -> Result<TreeStats> {
        fs::create_dir_all(&self.dest).await?;

        let mut raw = [0u8; STREAM_HEADER_LEN];
        source.read_exact(&mut raw).await?;
        let header = StreamHeader::decode(&raw)?;
        debug!(
            "Incoming stream: {} entries, {} bytes",
            header.entry_count, header.total_bytes
        );
        self.progress.start(header.total_bytes);

        let mut stats = TreeStats::default();
        let mut entries = 0u64;
        while !source.at_end().await {
            let entry = read_entry_header(source).await?;
            entries += 1;
            if entries > header.entry_count {
                return Err(TransferError::Protocol(format!(
                    "more entries than the {} announced",
                    header.entry_count
                )));
            }

            let target = self.dest.join(sanitize_relative_path(&entry.path)?);
            self.progress.set_label(entry.path.clone());
            match entry.kind {
                EntryKind::Directory => {
                    fs::create_dir_all(&target).await?;
                    stats.directories += 1;
                }
                EntryKind::File => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                    let mut file = fs::File::create(&target).await?;
                    let progress = &self.progress;
                    source
                        .copy_to(&mut file, entry.size, |n| progress.advance(n as u64))
                        .await?;
                    file.flush().await?;
                    stats.files += 1;
                    stats.bytes += entry.size;
                }
            }
        }

        if entries != header.entry_count {
            return Err(TransferError::Protocol(format!(
                "stream ended after {} of {} entries",
                entries, header.entry_count
            )));
        }
        self.progress.finish();
        Ok(stats)
    }
}

async fn read_entry_header(source: &mut FrameSource) -> Result<EntryHeader> {
    let mut prefix = [0u8; ENTRY_PREFIX_LEN];
    source.read_exact(&mut prefix).await?;
    let (kind, path_len) = EntryHeader::decode_prefix(&prefix)?;

    let mut path = vec![0u8; path_len];
    source.read_exact(&mut path).await?;
    let path = String::from_utf8(path)
        .map_err(|e| TransferError::InvalidPath(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;

    let size = match kind {
        EntryKind::Directory => 0,
        EntryKind::File => {
            let mut size = [0u8; 8];
            source.read_exact(&mut size).await?;
            u64::from_be_bytes(size)
        }
    };
    Ok(EntryHeader { kind, path, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Frame;

    async fn feed(channel: &Channel, bytes: &[u8]) {
        let mut frame = Frame::with_capacity(bytes.len());
        frame.extend_from_slice(bytes);
        channel.write(frame).await.unwrap();
        channel.close();
    }

    fn writer_for(dest: PathBuf) -> (DirectoryWriter, Arc<Channel>) {
        let channel = Arc::new(Channel::new(1 << 16).unwrap());
        let writer = DirectoryWriter::new(
            dest,
            channel.clone(),
            Arc::new(BufferPool::new(256)),
            Arc::new(ProgressTracker::new()),
            CancellationToken::new(),
        );
        (writer, channel)
    }

    fn stream(entries: &[(EntryHeader, &[u8])]) -> Vec<u8> {
        let total = entries.iter().map(|(h, _)| h.size).sum();
        let mut out = StreamHeader {
            entry_count: entries.len() as u64,
            total_bytes: total,
        }
        .encode()
        .to_vec();
        for (header, content) in entries {
            out.extend_from_slice(&header.encode().unwrap());
            out.extend_from_slice(content);
        }
        out
    }

    /// 绕过编码端校验，直接构造恶意条目
    fn raw_entry(kind: u8, path: &str, content: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.extend_from_slice(path.as_bytes());
        if kind == 2 {
            out.extend_from_slice(&(content.len() as u64).to_be_bytes());
            out.extend_from_slice(content);
        }
        out
    }

    #[tokio::test]
    async fn test_materializes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");
        let (writer, channel) = writer_for(dest.clone());

        let bytes = stream(&[
            (EntryHeader::file("a.txt", 5), b"hello"),
            (EntryHeader::directory("sub"), b""),
            (EntryHeader::file("sub/b.txt", 5), b"world"),
            (EntryHeader::directory("empty"), b""),
        ]);
        feed(&channel, &bytes).await;

        let stats = writer.run().await.unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 2);
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dest.join("sub/b.txt")).unwrap(), b"world");
        assert!(dest.join("empty").is_dir());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x").join("y").join("dest");
        let (writer, channel) = writer_for(dest.clone());

        let mut bytes = StreamHeader {
            entry_count: 1,
            total_bytes: 4,
        }
        .encode()
        .to_vec();
        bytes.extend_from_slice(&raw_entry(2, "../../evil", b"evil"));
        feed(&channel, &bytes).await;

        let err = writer.run().await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
        assert!(!dir.path().join("x").join("evil").exists());
        assert!(!dir.path().join("evil").exists());
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, channel) = writer_for(dir.path().join("dest"));
        let mut bytes = StreamHeader {
            entry_count: 1,
            total_bytes: 0,
        }
        .encode()
        .to_vec();
        bytes.extend_from_slice(&raw_entry(1, "/tmp/owned", b""));
        feed(&channel, &bytes).await;
        assert!(matches!(
            writer.run().await,
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, channel) = writer_for(dir.path().join("dest"));
        let mut bytes = stream(&[(EntryHeader::file("a.txt", 5), b"hello")]);
        bytes.truncate(bytes.len() - 2);
        feed(&channel, &bytes).await;
        assert!(matches!(writer.run().await, Err(TransferError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_missing_entries_fail() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, channel) = writer_for(dir.path().join("dest"));
        let mut bytes = StreamHeader {
            entry_count: 2,
            total_bytes: 0,
        }
        .encode()
        .to_vec();
        bytes.extend_from_slice(&EntryHeader::directory("only").encode().unwrap());
        feed(&channel, &bytes).await;
        assert!(matches!(writer.run().await, Err(TransferError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_empty_stream_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, channel) = writer_for(dir.path().join("dest"));
        channel.close();
        assert!(matches!(writer.run().await, Err(TransferError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_progress_is_determinate() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(Channel::new(1 << 16).unwrap());
        let progress = Arc::new(ProgressTracker::new());
        let writer = DirectoryWriter::new(
            dir.path().join("dest"),
            channel.clone(),
            Arc::new(BufferPool::new(64)),
            progress.clone(),
            CancellationToken::new(),
        );
        feed(&channel, &stream(&[(EntryHeader::file("f", 3), b"abc")])).await;
        writer.run().await.unwrap();

        let p = progress.snapshot();
        assert_eq!((p.now, p.max), (3, 3));
        assert_eq!(p.label, None);
    }
}
