//! 哈希索引
//!
//! 保存在目标目录中，记录上次同步时每个文件的内容哈希，
//! 下次同步时可以跳过读取目标文件。

use crate::error::{Result, SyncError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xxhash_rust::xxh64::Xxh64;

/// 哈希索引文件名，扫描时始终排除
pub const HASH_INDEX_FILE: &str = ".mirrorsync_hash.txt";

/// 哈希与路径之间的分隔符
const DELIMITER: char = '|';

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 计算文件内容的 XXH64 哈希（16 位十六进制）
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh64::new(0);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:016x}", hasher.digest()))
}

/// 路径 -> 哈希
#[derive(Debug, Default, Clone)]
pub struct HashIndex {
    entries: HashMap<String, String>,
}

impl HashIndex {
    /// 索引文件路径
    pub fn file_path(target_root: &Path) -> PathBuf {
        target_root.join(HASH_INDEX_FILE)
    }

    /// 解析一行 `hash|path`，必须恰好包含一个分隔符
    pub fn parse_line(line_no: usize, line: &str) -> Result<(String, String)> {
        if line.matches(DELIMITER).count() != 1 {
            return Err(SyncError::Format {
                line: line_no,
                content: line.to_string(),
            });
        }

        let (hash, path) = line.split_once(DELIMITER).unwrap_or_default();
        Ok((path.to_string(), hash.to_string()))
    }

    /// 从目标目录加载索引
    ///
    /// 文件不存在时返回空索引。格式错误的行被跳过，并在第二个返回值中报告。
    pub fn load(target_root: &Path) -> Result<(Self, Vec<SyncError>)> {
        let path = Self::file_path(target_root);

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("哈希索引不存在: {}", path.display());
                return Ok((Self::default(), Vec::new()));
            }
            Err(e) => return Err(SyncError::io(path, e)),
        };

        let mut entries = HashMap::new();
        let mut skipped = Vec::new();

        for (i, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match Self::parse_line(i + 1, line) {
                Ok((file, hash)) => {
                    entries.insert(file, hash);
                }
                Err(e) => skipped.push(e),
            }
        }

        info!(
            "已加载哈希索引: {} 条记录, {} 行格式错误",
            entries.len(),
            skipped.len()
        );

        Ok((Self { entries }, skipped))
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 整体重写索引文件，每个路径一行；没有哈希的路径写为空哈希
    pub fn save<'a, I>(target_root: &Path, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let path = Self::file_path(target_root);
        let temp_path = target_root.join(format!("{}.tmp", HASH_INDEX_FILE));

        let write = || -> io::Result<usize> {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            let mut count = 0;
            for (file, hash) in entries {
                writeln!(writer, "{}{}{}", hash.unwrap_or(""), DELIMITER, file)?;
                count += 1;
            }
            writer.flush()?;
            Ok(count)
        };

        let count = write().map_err(|e| SyncError::io(&temp_path, e))?;
        // 使用临时文件写入，然后原子重命名
        std::fs::rename(&temp_path, &path).map_err(|e| SyncError::io(&path, e))?;

        info!("已写入哈希索引: {} 条记录 -> {}", count, path.display());
        Ok(count)
    }
}
