//! SpoolMailer - メッセージをスプールディレクトリに書き出す Mailer
//!
//! SMTP の送信は外部の MTA（pickup ディレクトリを監視するもの）に任せる。
//! ファイルは `.tmp` に書いてから rename するので、MTA が書きかけを拾うことはない。
//! 書き込みか rename に失敗したら `.tmp` は消す。ただし send の future が
//! write と rename の間で drop された場合（タイムアウトなど）は `.tmp` が残る。
//! MTA は `.eml` しか見ないので配送には影響しない。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::DeliveryError;
use crate::ports::Mailer;

pub struct SpoolMailer {
    dir: PathBuf,
    sender: String,
    seq: AtomicU64,
}

impl SpoolMailer {
    pub fn new(dir: impl Into<PathBuf>, sender: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            sender: sender.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_file_stem(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq:04}", Utc::now().format("%Y%m%dT%H%M%S%.6fZ"))
    }

    fn compose(&self, recipient: &str, subject: &str, html_body: &str) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMIME-Version: 1.0\r\n\
             Content-Type: text/html; charset=utf-8\r\n\r\n{}",
            self.sender,
            recipient,
            subject,
            Utc::now().to_rfc2822(),
            html_body
        )
    }

    /// `{stem}.tmp` に書いてから `{stem}.eml` に rename する。失敗したら `.tmp` を消す
    async fn spool(&self, stem: &str, message: String) -> Result<PathBuf, DeliveryError> {
        let tmp = self.dir.join(format!("{stem}.tmp"));
        let dest = self.dir.join(format!("{stem}.eml"));

        let written = match tokio::fs::write(&tmp, message).await {
            Ok(()) => tokio::fs::rename(&tmp, &dest)
                .await
                .map_err(|e| format!("rename {}: {e}", tmp.display())),
            Err(e) => Err(format!("write {}: {e}", tmp.display())),
        };

        if let Err(reason) = written {
            if let Err(e) = tokio::fs::remove_file(&tmp).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %tmp.display(), error = %e, "could not remove partial spool file");
            }
            return Err(DeliveryError::Transport(reason));
        }
        Ok(dest)
    }
}

#[async_trait]
impl Mailer for SpoolMailer {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), DeliveryError> {
        if [recipient, subject].iter().any(|h| h.contains(['\r', '\n'])) {
            return Err(DeliveryError::Rejected("header contains a line break".into()));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DeliveryError::Transport(format!("create spool dir {}: {e}", self.dir.display())))?;

        let stem = self.next_file_stem();
        let dest = self.spool(&stem, self.compose(recipient, subject, html_body)).await?;
        debug!(path = %dest.display(), "message spooled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spooled(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_writes_one_eml_per_message() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("outbox");
        let mailer = SpoolMailer::new(&dir, "digest@localhost");

        mailer.send("ops@example.com", "Summary", "<p>one</p>").await.unwrap();
        mailer.send("ops@example.com", "Summary", "<p>two</p>").await.unwrap();

        let files = spooled(&dir);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| p.extension().is_some_and(|e| e == "eml")));

        let first = std::fs::read_to_string(&files[0]).unwrap();
        assert!(first.starts_with("From: digest@localhost\r\nTo: ops@example.com\r\nSubject: Summary\r\n"));
        assert!(first.contains("Content-Type: text/html; charset=utf-8"));
        assert!(first.ends_with("<p>one</p>"));
    }

    #[tokio::test]
    async fn test_rejects_header_injection() {
        let tmp = tempfile::tempdir().unwrap();
        let mailer = SpoolMailer::new(tmp.path(), "digest@localhost");

        let err = mailer
            .send("ops@example.com\r\nBcc: x@example.com", "Summary", "")
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected(_)));
        assert!(spooled(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mailer = SpoolMailer::new(tmp.path(), "digest@localhost");
        // 同名の .eml がディレクトリ（中身あり）だと rename は失敗する
        let taken = tmp.path().join("fixed.eml");
        std::fs::create_dir(&taken).unwrap();
        std::fs::write(taken.join("occupant"), b"x").unwrap();

        let err = mailer.spool("fixed", "body".into()).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Transport(ref reason) if reason.starts_with("rename")));
        assert!(!tmp.path().join("fixed.tmp").exists());
        assert_eq!(spooled(tmp.path()), vec![taken]);
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_transport_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let mailer = SpoolMailer::new(blocker.join("outbox"), "digest@localhost");

        let err = mailer.send("ops@example.com", "Summary", "").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }
}
