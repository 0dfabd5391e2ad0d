//! 发送端目录读取任务
//!
//! 先扫描所选条目得到总量，再按深度优先顺序把流头、条目头和文件内容写入通道。
//! 无论成功与否，结束时都会关闭通道，使网络循环看到流结束。

use super::TreeStats;
use super::frames::FrameSink;
use super::protocol::{EntryHeader, EntryKind, StreamHeader, sanitize_relative_path};
use crate::error::{Result, TransferError};
use crate::io::{BufferPool, Channel, ProgressTracker};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 扫描得到的待发送条目
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScannedEntry {
    header: EntryHeader,
    source: PathBuf,
}

pub struct DirectoryReader {
    root: PathBuf,
    entries: Vec<String>,
    channel: Arc<Channel>,
    pool: Arc<BufferPool>,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
}

impl DirectoryReader {
    /// `entries` 为根目录下要发送的相对路径；为空时发送整个根目录的内容
    pub fn new(
        root: impl Into<PathBuf>,
        entries: Vec<String>,
        channel: Arc<Channel>,
        pool: Arc<BufferPool>,
        progress: Arc<ProgressTracker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            root: root.into(),
            entries,
            channel,
            pool,
            progress,
            cancel,
        }
    }

    /// 在独立任务中运行
    pub fn spawn(self) -> JoinHandle<Result<TreeStats>> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> Result<TreeStats> {
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(TransferError::Cancelled),
            r = self.stream() => r,
        };
        self.channel.close();
        match &result {
            Ok(stats) => info!(
                "Directory reader finished: {} files, {} dirs, {} bytes",
                stats.files, stats.directories, stats.bytes
            ),
            Err(e) => warn!("Directory reader failed: {}", e),
        }
        result
    }

    async fn stream(&self) -> Result<TreeStats> {
        let scanned = self.scan().await?;
        let total_bytes = scanned.iter().map(|e| e.header.size).sum();
        let header = StreamHeader {
            entry_count: scanned.len() as u64,
            total_bytes,
        };
        debug!(
            "Scanned {} entries under {:?}, {} bytes",
            header.entry_count, self.root, total_bytes
        );
        self.progress.start(total_bytes);

        let mut sink = FrameSink::new(self.channel.clone(), self.pool.clone());
        sink.write_all(&header.encode()).await?;

        let mut stats = TreeStats::default();
        for entry in &scanned {
            self.progress.set_label(entry.header.path.clone());
            sink.write_all(&entry.header.encode()?).await?;
            match entry.header.kind {
                EntryKind::Directory => stats.directories += 1,
                EntryKind::File => {
                    let mut file = fs::File::open(&entry.source).await?;
                    let progress = &self.progress;
                    sink.copy_from(&mut file, entry.header.size, |n| {
                        progress.advance(n as u64);
                    })
                    .await?;
                    stats.files += 1;
                    stats.bytes += entry.header.size;
                }
            }
        }
        sink.flush().await?;
        self.progress.finish();
        Ok(stats)
    }

    /// 深度优先遍历，子项按名称排序；符号链接和特殊文件被跳过
    async fn scan(&self) -> Result<Vec<ScannedEntry>> {
        let top = if self.entries.is_empty() {
            list_dir(&self.root).await?
        } else {
            self.entries.clone()
        };

        let mut stack: Vec<String> = top.into_iter().rev().collect();
        let mut out = Vec::new();
        while let Some(rel) = stack.pop() {
            let source = self.root.join(sanitize_relative_path(&rel)?);
            let meta = fs::symlink_metadata(&source).await?;
            if meta.is_dir() {
                let children = list_dir(&source).await?;
                stack.extend(children.into_iter().rev().map(|c| format!("{rel}/{c}")));
                out.push(ScannedEntry {
                    header: EntryHeader::directory(rel),
                    source,
                });
            } else if meta.is_file() {
                out.push(ScannedEntry {
                    header: EntryHeader::file(rel, meta.len()),
                    source,
                });
            } else {
                warn!("Skipping {:?}: not a regular file or directory", source);
            }
        }
        Ok(out)
    }
}

/// 目录下的子项名称（已排序）
async fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name();
        let name = name
            .into_string()
            .map_err(|raw| TransferError::InvalidPath(raw.to_string_lossy().into_owned()))?;
        names.push(name);
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_for(root: &Path, entries: Vec<String>) -> (DirectoryReader, Arc<Channel>) {
        let channel = Arc::new(Channel::new(1 << 20).unwrap());
        let reader = DirectoryReader::new(
            root,
            entries,
            channel.clone(),
            Arc::new(BufferPool::new(1024)),
            Arc::new(ProgressTracker::new()),
            CancellationToken::new(),
        );
        (reader, channel)
    }

    #[tokio::test]
    async fn test_scan_order_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::create_dir_all(dir.path().join("a/z")).unwrap();
        std::fs::write(dir.path().join("a/y.txt"), b"yyy").unwrap();
        std::fs::write(dir.path().join("a/z/x.txt"), b"x").unwrap();

        let (reader, _channel) = reader_for(dir.path(), vec![]);
        let scanned = reader.scan().await.unwrap();
        let headers: Vec<EntryHeader> = scanned.into_iter().map(|e| e.header).collect();
        assert_eq!(
            headers,
            vec![
                EntryHeader::directory("a"),
                EntryHeader::file("a/y.txt", 3),
                EntryHeader::directory("a/z"),
                EntryHeader::file("a/z/x.txt", 1),
                EntryHeader::file("b.txt", 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_selected_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"s").unwrap();

        let (reader, _channel) = reader_for(dir.path(), vec!["keep.txt".into()]);
        let scanned = reader.scan().await.unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].header.path, "keep.txt");
    }

    #[tokio::test]
    async fn test_missing_entry_fails_and_closes_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, channel) = reader_for(dir.path(), vec!["nope.txt".into()]);
        let result = reader.run().await;
        assert!(matches!(result, Err(TransferError::Io(_))));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_traversal_in_selection_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, _channel) = reader_for(dir.path(), vec!["../etc".into()]);
        assert!(matches!(
            reader.run().await,
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_blocked_reader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![0u8; 64 * 1024]).unwrap();

        // 通道只能容纳一帧，没有消费者时读取任务会阻塞在写入上
        let channel = Arc::new(Channel::new(1024).unwrap());
        let cancel = CancellationToken::new();
        let handle = DirectoryReader::new(
            dir.path(),
            vec![],
            channel.clone(),
            Arc::new(BufferPool::new(1024)),
            Arc::new(ProgressTracker::new()),
            cancel.clone(),
        )
        .spawn();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(channel.is_closed());
    }
}
