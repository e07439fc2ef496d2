//! MinerU cloud document parser
//!
//! Layout-aware recognition tier built on the asynchronous batch API:
//! - `POST /api/v4/file-urls/batch` → batch id + presigned upload URL
//! - `PUT <upload url>` with the raw bytes
//! - `GET /api/v4/extract-results/batch/{batch_id}` until `done` / `failed`
//! - download `full_zip_url` and read the Markdown rendition from the archive

use crate::recognition::cloud_job::{
    CloudJobClient, CloudJobError, JobBackend, JobOutcome, PollStatus, UploadTarget,
};
use crate::types::{ImageInput, ProviderError, RecognitionProvider};
use icecream_common::config::{CloudJobConfig, MineruConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Markdown entry MinerU writes for the whole document
const FULL_MARKDOWN_ENTRY: &str = "full.md";

#[derive(Debug, Serialize)]
struct BatchUploadRequest<'a> {
    files: Vec<BatchFile<'a>>,
    model_version: &'static str,
    enable_formula: bool,
    enable_table: bool,
}

#[derive(Debug, Serialize)]
struct BatchFile<'a> {
    name: &'a str,
    /// Correlates the upload with its entry in the batch results
    data_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchUploadData {
    batch_id: String,
    file_urls: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchResultData {
    #[serde(default)]
    extract_result: Vec<ExtractResult>,
}

#[derive(Debug, Deserialize)]
struct ExtractResult {
    state: String,
    #[serde(default)]
    full_zip_url: Option<String>,
    #[serde(default)]
    err_msg: Option<String>,
}

/// HTTP implementation of the MinerU batch protocol
pub struct MineruBackend {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl MineruBackend {
    pub fn new(config: &MineruConfig, request_timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("MINERU_API_KEY missing".to_string()))?;

        let http_client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl JobBackend for MineruBackend {
    async fn request_upload(&self, filename: &str) -> Result<UploadTarget, ProviderError> {
        let data_id = Uuid::new_v4().to_string();
        debug!(filename, data_id = %data_id, "Requesting upload target");
        let body = BatchUploadRequest {
            files: vec![BatchFile { name: filename, data_id }],
            model_version: "vlm",
            enable_formula: true,
            enable_table: true,
        };

        let response = self
            .http_client
            .post(format!("{}/api/v4/file-urls/batch", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let raw = response.text().await?;
        parse_upload_target(&raw)
    }

    async fn upload(&self, target: &UploadTarget, bytes: &[u8]) -> Result<(), ProviderError> {
        let response = self
            .http_client
            .put(&target.upload_url)
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn poll(&self, job_id: &str, limit: Duration) -> Result<PollStatus, CloudJobError> {
        let response = match self
            .http_client
            .get(format!(
                "{}/api/v4/extract-results/batch/{}",
                self.base_url, job_id
            ))
            .bearer_auth(&self.api_key)
            .timeout(limit)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(PollStatus::Unavailable(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(PollStatus::Unavailable(format!("HTTP {}", status.as_u16())));
        }

        match response.text().await {
            Ok(raw) => parse_poll_response(&raw),
            Err(e) => Ok(PollStatus::Unavailable(e.to_string())),
        }
    }

    async fn fetch_artifact(&self, result_ref: &str) -> Result<Option<String>, ProviderError> {
        let response = self.http_client.get(result_ref).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let bytes = response.bytes().await?;
        debug!(size = bytes.len(), "Downloaded MinerU result archive");
        extract_markdown(&bytes)
    }
}

fn parse_upload_target(raw: &str) -> Result<UploadTarget, ProviderError> {
    let envelope: Envelope<BatchUploadData> = serde_json::from_str(raw)
        .map_err(|e| ProviderError::Malformed(format!("upload target response: {}", e)))?;

    if envelope.code != 0 {
        return Err(ProviderError::Unavailable(format!(
            "upload target rejected (code {}): {}",
            envelope.code,
            envelope.msg.unwrap_or_default()
        )));
    }

    let data = envelope
        .data
        .ok_or_else(|| ProviderError::Malformed("upload target response has no data".to_string()))?;
    let upload_url = data
        .file_urls
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("no upload URL issued".to_string()))?;

    Ok(UploadTarget {
        job_id: data.batch_id,
        upload_url,
    })
}

/// Validate one poll body; a body that does not match the schema is a defect
fn parse_poll_response(raw: &str) -> Result<PollStatus, CloudJobError> {
    let envelope: Envelope<BatchResultData> = serde_json::from_str(raw)
        .map_err(|e| CloudJobError::Malformed(format!("poll response: {}", e)))?;

    if envelope.code != 0 {
        return Ok(PollStatus::Unavailable(format!(
            "code {}: {}",
            envelope.code,
            envelope.msg.unwrap_or_default()
        )));
    }

    let Some(result) = envelope.data.and_then(|d| d.extract_result.into_iter().next()) else {
        return Ok(PollStatus::Pending("queued".to_string()));
    };

    match result.state.as_str() {
        "done" => match result.full_zip_url.filter(|url| !url.trim().is_empty()) {
            Some(result_ref) => Ok(PollStatus::Done { result_ref }),
            None => Err(CloudJobError::Malformed(
                "job reported done without a result URL".to_string(),
            )),
        },
        "failed" => Ok(PollStatus::Failed(
            result
                .err_msg
                .unwrap_or_else(|| "remote extraction failed".to_string()),
        )),
        other => Ok(PollStatus::Pending(other.to_string())),
    }
}

/// Read the Markdown rendition from a MinerU result archive
///
/// Prefers `full.md`, otherwise the first `.md` entry. `Ok(None)` when the
/// archive holds no Markdown at all.
pub fn extract_markdown(archive_bytes: &[u8]) -> Result<Option<String>, ProviderError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| ProviderError::Malformed(format!("result archive: {}", e)))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let chosen = names
        .iter()
        .find(|name| {
            name.rsplit('/').next() == Some(FULL_MARKDOWN_ENTRY)
        })
        .or_else(|| names.iter().find(|name| name.to_lowercase().ends_with(".md")));

    let Some(name) = chosen else {
        return Ok(None);
    };

    let mut entry = archive
        .by_name(name)
        .map_err(|e| ProviderError::Malformed(format!("archive entry {}: {}", name, e)))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| ProviderError::Malformed(format!("archive entry {}: {}", name, e)))?;

    Ok(Some(text))
}

/// Recognition tier over a cloud job
pub struct MineruRecognizer<B = MineruBackend> {
    jobs: CloudJobClient<B>,
}

impl MineruRecognizer<MineruBackend> {
    pub fn from_config(
        config: &MineruConfig,
        job_config: CloudJobConfig,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let backend = MineruBackend::new(config, request_timeout)?;
        Ok(Self::new(CloudJobClient::new(backend, job_config)))
    }
}

impl<B: JobBackend> MineruRecognizer<B> {
    pub fn new(jobs: CloudJobClient<B>) -> Self {
        Self { jobs }
    }
}

#[async_trait::async_trait]
impl<B: JobBackend + 'static> RecognitionProvider for MineruRecognizer<B> {
    fn name(&self) -> &'static str {
        "mineru"
    }

    /// Upload retries plus the polling ceiling, with one spare interval
    fn time_budget(&self, per_call: Duration) -> Duration {
        let job = self.jobs.config();
        let upload = (per_call + job.upload_retry_delay) * job.upload_attempts.max(1);
        per_call + upload + job.max_wait + job.poll_interval + per_call
    }

    async fn recognize(&self, image: &ImageInput) -> Result<String, ProviderError> {
        let completed = self
            .jobs
            .run(&image.filename, &image.bytes)
            .await
            .map_err(|e| {
                error!(error = %e, "MinerU returned a malformed response");
                ProviderError::Malformed(e.to_string())
            })?;

        match completed.outcome {
            JobOutcome::Done(text) => {
                info!(
                    job_id = %completed.job.id,
                    polls = completed.job.polls,
                    chars = text.chars().count(),
                    "MinerU recognition complete"
                );
                Ok(text)
            }
            JobOutcome::Failed(reason) => Err(ProviderError::Unavailable(reason)),
            JobOutcome::TimedOut(waited) => Err(ProviderError::Unavailable(format!(
                "job {} timed out after {:?}",
                completed.job.id, waited
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::cloud_job::ManualClock;
    use crate::recognition::TieredRecognizer;
    use std::io::Write;
    use std::sync::Arc;
    use zip::write::SimpleFileOptions;

    /// Job backend whose every poll answers with the same status
    struct FixedPollBackend {
        status: Result<PollStatus, CloudJobError>,
        artifact: Option<String>,
    }

    #[async_trait::async_trait]
    impl JobBackend for FixedPollBackend {
        async fn request_upload(&self, _filename: &str) -> Result<UploadTarget, ProviderError> {
            Ok(UploadTarget {
                job_id: "b-7".to_string(),
                upload_url: "https://oss/put".to_string(),
            })
        }

        async fn upload(&self, _target: &UploadTarget, _bytes: &[u8]) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn poll(&self, _job_id: &str, _limit: Duration) -> Result<PollStatus, CloudJobError> {
            self.status.clone()
        }

        async fn fetch_artifact(&self, _result_ref: &str) -> Result<Option<String>, ProviderError> {
            Ok(self.artifact.clone())
        }
    }

    fn recognizer(status: Result<PollStatus, CloudJobError>) -> MineruRecognizer<FixedPollBackend> {
        let backend = FixedPollBackend {
            status,
            artifact: Some("| 姓名 | 性别 |\n| 张三 | 男 |".to_string()),
        };
        MineruRecognizer::new(CloudJobClient::with_clock(
            backend,
            CloudJobConfig::default(),
            Arc::new(ManualClock::new()),
        ))
    }

    fn image() -> ImageInput {
        ImageInput::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "roster.jpg")
    }

    struct ReadingVision;

    #[async_trait::async_trait]
    impl RecognitionProvider for ReadingVision {
        fn name(&self) -> &'static str {
            "vision"
        }

        async fn recognize(&self, _image: &ImageInput) -> Result<String, ProviderError> {
            Ok("张三 男 90".to_string())
        }
    }

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_extract_prefers_full_markdown() {
        let bytes = zip_with(&[
            ("batch/layout.md", "partial"),
            ("batch/full.md", "| 姓名 | 性别 |"),
            ("batch/images/a.png", "png"),
        ]);
        assert_eq!(
            extract_markdown(&bytes).unwrap().as_deref(),
            Some("| 姓名 | 性别 |")
        );
    }

    #[test]
    fn test_extract_falls_back_to_any_markdown() {
        let bytes = zip_with(&[("out/content.MD", "text")]);
        assert_eq!(extract_markdown(&bytes).unwrap().as_deref(), Some("text"));
    }

    #[test]
    fn test_extract_without_markdown_is_none() {
        let bytes = zip_with(&[("images/a.png", "png")]);
        assert_eq!(extract_markdown(&bytes).unwrap(), None);
    }

    #[test]
    fn test_extract_corrupt_archive_is_malformed() {
        assert!(matches!(
            extract_markdown(b"definitely not a zip"),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_upload_target() {
        let raw = r#"{"code":0,"msg":"ok","data":{"batch_id":"b-1","file_urls":["https://oss/put"]}}"#;
        assert_eq!(
            parse_upload_target(raw).unwrap(),
            UploadTarget {
                job_id: "b-1".to_string(),
                upload_url: "https://oss/put".to_string()
            }
        );

        let rejected = r#"{"code":-60001,"msg":"quota exceeded"}"#;
        assert!(matches!(
            parse_upload_target(rejected),
            Err(ProviderError::Unavailable(_))
        ));

        let no_data = r#"{"code":0,"msg":"ok"}"#;
        assert!(matches!(
            parse_upload_target(no_data),
            Err(ProviderError::Malformed(_))
        ));

        let no_urls = r#"{"code":0,"data":{"batch_id":"b-1","file_urls":[]}}"#;
        assert!(matches!(
            parse_upload_target(no_urls),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_poll_states() {
        let done = r#"{"code":0,"data":{"extract_result":[{"state":"done","full_zip_url":"https://cdn/r.zip"}]}}"#;
        assert_eq!(
            parse_poll_response(done).unwrap(),
            PollStatus::Done {
                result_ref: "https://cdn/r.zip".to_string()
            }
        );

        let failed = r#"{"code":0,"data":{"extract_result":[{"state":"failed","err_msg":"bad image"}]}}"#;
        assert_eq!(
            parse_poll_response(failed).unwrap(),
            PollStatus::Failed("bad image".to_string())
        );

        let running = r#"{"code":0,"data":{"extract_result":[{"state":"running"}]}}"#;
        assert_eq!(
            parse_poll_response(running).unwrap(),
            PollStatus::Pending("running".to_string())
        );

        let no_data = r#"{"code":0}"#;
        assert!(matches!(parse_poll_response(no_data).unwrap(), PollStatus::Pending(_)));

        let empty = r#"{"code":0,"data":{"extract_result":[]}}"#;
        assert!(matches!(parse_poll_response(empty).unwrap(), PollStatus::Pending(_)));

        let error_code = r#"{"code":500,"msg":"busy"}"#;
        assert!(matches!(
            parse_poll_response(error_code).unwrap(),
            PollStatus::Unavailable(_)
        ));
    }

    #[test]
    fn test_parse_poll_malformed() {
        assert!(parse_poll_response("<html>502</html>").is_err());
        let done_without_url = r#"{"code":0,"data":{"extract_result":[{"state":"done"}]}}"#;
        assert!(parse_poll_response(done_without_url).is_err());
    }

    #[tokio::test]
    async fn test_done_job_returns_markdown() {
        let done = Ok(PollStatus::Done {
            result_ref: "https://cdn/r.zip".to_string(),
        });
        let text = recognizer(done).recognize(&image()).await.unwrap();
        assert!(text.contains("张三"));
    }

    #[tokio::test]
    async fn test_remote_failure_is_unavailable() {
        let failed = Ok(PollStatus::Failed("bad image".to_string()));
        let result = recognizer(failed).recognize(&image()).await;
        assert_eq!(result, Err(ProviderError::Unavailable("bad image".to_string())));
    }

    #[tokio::test]
    async fn test_timed_out_job_is_unavailable() {
        let pending = Ok(PollStatus::Pending("running".to_string()));
        let result = recognizer(pending).recognize(&image()).await;
        assert!(matches!(result, Err(ProviderError::Unavailable(ref msg)) if msg.contains("b-7") && msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_malformed_poll_is_malformed() {
        let malformed = Err(CloudJobError::Malformed("<html>".to_string()));
        let result = recognizer(malformed).recognize(&image()).await;
        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn test_time_budget_covers_upload_retries_and_polling() {
        let pending = Ok(PollStatus::Pending("running".to_string()));
        let budget = recognizer(pending).time_budget(Duration::from_secs(10));
        // request + 6 × (upload + retry delay) + 60s ceiling + 3s interval + download
        assert_eq!(budget, Duration::from_secs(10 + 6 * 11 + 60 + 3 + 10));
        assert!(budget > Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timed_out_cloud_tier_falls_back_to_vision() {
        let pending = Ok(PollStatus::Pending("running".to_string()));
        let recognizer = TieredRecognizer::new(
            vec![
                Arc::new(recognizer(pending)) as Arc<dyn RecognitionProvider>,
                Arc::new(ReadingVision) as Arc<dyn RecognitionProvider>,
            ],
            Duration::from_secs(10),
        );

        let recognition = recognizer.recognize(&image()).await.unwrap();
        assert_eq!(recognition.tier, 2);
        assert_eq!(recognition.provider, "vision");
        assert_eq!(recognition.text, "张三 男 90");
    }
}
