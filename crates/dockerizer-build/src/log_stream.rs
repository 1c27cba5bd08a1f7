//! ビルド/プッシュ進捗ストリームのバッチ処理
//!
//! デーモンから届く生のチャンクを1行ずつ分類し、人が読めるログ行に変換して
//! 行数か経過時間のどちらかのしきい値でまとめて [`LogSink`] に送ります。
//!
//! - 不正な JSON は "JSON decode error" 行として残し、ストリームは継続する
//! - `error` を含むレコードはストリームを即座に打ち切る
//! - どちらの終わり方でも、未送信の行は必ず送る

use crate::collaborators::{LogBatch, LogSink};
use crate::daemon::ProgressStream;
use dockerizer_config::LogBatchSettings;
use futures_util::StreamExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// デコード済みの進捗レコード
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressRecord {
    /// ビルド出力
    Stream(String),
    /// プッシュの状態
    Status {
        status: String,
        progress: Option<String>,
    },
    /// プッシュ完了時のペイロード（digest, size など）
    Aux(Value),
    /// ビルダー自身が報告したエラー
    Error(String),
    /// 上記以外
    Other(Value),
    /// JSON として解釈できなかった行
    Malformed(String),
}

/// 値が空でないか（null, false, 0, 空文字列, 空配列, 空オブジェクトは偽）
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value.get(name).filter(|v| is_truthy(v))
}

/// 値を表示用の文字列にする（文字列はクォートしない）
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ProgressRecord {
    /// 1行をデコードして分類
    pub fn parse(line: &str) -> Self {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => return ProgressRecord::Malformed(line.to_string()),
        };

        if let Some(error) = field(&value, "error") {
            ProgressRecord::Error(text(error))
        } else if let Some(stream) = field(&value, "stream") {
            ProgressRecord::Stream(text(stream))
        } else if let Some(status) = field(&value, "status") {
            ProgressRecord::Status {
                status: text(status),
                progress: field(&value, "progress").map(text),
            }
        } else if let Some(aux) = field(&value, "aux") {
            ProgressRecord::Aux(aux.clone())
        } else {
            ProgressRecord::Other(value)
        }
    }

    /// ログ行に変換。エラーレコードは `None`
    pub fn log_line(&self) -> Option<String> {
        match self {
            ProgressRecord::Stream(stream) => Some(format!("Build: {}", stream.trim())),
            ProgressRecord::Status { status, progress } => Some(
                format!("Push: {} {}", status, progress.as_deref().unwrap_or(""))
                    .trim_end()
                    .to_string(),
            ),
            ProgressRecord::Aux(aux) => Some(format!("Push finished: {}", aux)),
            ProgressRecord::Other(value) => Some(value.to_string()),
            ProgressRecord::Malformed(raw) => Some(format!("JSON decode error: {}", raw)),
            ProgressRecord::Error(_) => None,
        }
    }
}

/// 1 チャンク（改行区切りで複数レコードを含みうる）を分解
pub fn parse_chunk(chunk: &[u8]) -> Vec<ProgressRecord> {
    let raw = String::from_utf8_lossy(chunk);
    raw.trim()
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ProgressRecord::parse)
        .collect()
}

/// ストリームが途中で終わった理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// ビルダーがストリーム内でエラーを報告した
    Embedded(String),
    /// デーモンとの通信に失敗した
    Transport(String),
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFailure::Embedded(message) | StreamFailure::Transport(message) => {
                f.write_str(message)
            }
        }
    }
}

/// ストリーム消費の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed(StreamFailure),
}

impl StreamOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StreamOutcome::Completed)
    }
}

/// 進捗ストリームを消費してログをバッチ送信する
pub struct LogBatcher {
    sink: Arc<dyn LogSink>,
    job_uuid: String,
    job_name: String,
    max_lines: usize,
    flush_interval: Duration,
}

impl LogBatcher {
    pub fn new(
        sink: Arc<dyn LogSink>,
        job_uuid: impl Into<String>,
        job_name: impl Into<String>,
        settings: &LogBatchSettings,
    ) -> Self {
        Self {
            sink,
            job_uuid: job_uuid.into(),
            job_name: job_name.into(),
            max_lines: settings.max_lines.max(1),
            flush_interval: settings.flush_interval(),
        }
    }

    /// ストリームを最後まで（またはエラーまで）消費する
    pub async fn consume(&self, mut stream: ProgressStream<'_>) -> StreamOutcome {
        let mut pending: Vec<String> = Vec::with_capacity(self.max_lines);
        let mut last_flush = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    return self
                        .abort(&mut pending, StreamFailure::Transport(e.to_string()))
                        .await;
                }
            };

            for record in parse_chunk(&chunk) {
                if let ProgressRecord::Error(message) = record {
                    return self
                        .abort(&mut pending, StreamFailure::Embedded(message))
                        .await;
                }

                if let Some(line) = record.log_line() {
                    pending.push(line);
                }
                if pending.len() >= self.max_lines {
                    self.flush(&mut pending).await;
                    last_flush = Instant::now();
                }
            }

            if !pending.is_empty() && last_flush.elapsed() > self.flush_interval {
                self.flush(&mut pending).await;
                last_flush = Instant::now();
            }
        }

        if !pending.is_empty() {
            self.flush(&mut pending).await;
        }

        StreamOutcome::Completed
    }

    /// 未送信の行とエラー行を送ってから失敗を返す
    async fn abort(&self, pending: &mut Vec<String>, failure: StreamFailure) -> StreamOutcome {
        tracing::error!("Build Error {}", failure);
        pending.push(format!("Build Error: {}", failure));
        // エラー行の追加で上限を超えた場合も1バッチの上限は守る
        while !pending.is_empty() {
            let take = pending.len().min(self.max_lines);
            let mut batch: Vec<String> = pending.drain(..take).collect();
            self.flush(&mut batch).await;
        }
        StreamOutcome::Failed(failure)
    }

    async fn flush(&self, pending: &mut Vec<String>) {
        let batch = LogBatch {
            job_uuid: self.job_uuid.clone(),
            job_name: self.job_name.clone(),
            log_lines: std::mem::take(pending),
        };
        if let Err(e) = self.sink.publish(batch).await {
            tracing::warn!("Failed to publish build logs for {}: {}", self.job_uuid, e);
        }
    }
}
