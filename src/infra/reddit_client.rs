use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::app::ports::{PostSource, SubmissionTarget};
use crate::config::RedditCredentials;
use crate::error::{HarvestError, Result};
use crate::types::{FlairTemplate, SourcePost, SubmissionRef};

const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

// Refresh a little before Reddit's stated expiry
const TOKEN_MARGIN: Duration = Duration::from_secs(60);
const SUBMISSION_LOOKUP_ATTEMPTS: usize = 5;
const SUBMISSION_LOOKUP_DELAY: Duration = Duration::from_secs(2);
// Overrides the client's API timeout for the asset upload
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

/// Where and how to upload a media asset before submitting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLease {
    pub action: String,
    pub fields: Vec<(String, String)>,
}

impl UploadLease {
    /// Public URL of the asset once uploaded.
    pub fn asset_url(&self) -> Option<String> {
        self.fields
            .iter()
            .find(|(k, _)| k == "key")
            .map(|(_, key)| format!("{}/{}", self.action.trim_end_matches('/'), key))
    }
}

/// Reddit OAuth API client (script-app password grant).
pub struct RedditClient {
    http: reqwest::Client,
    creds: RedditCredentials,
    token: Mutex<Option<CachedToken>>,
}

impl RedditClient {
    pub fn new(http: reqwest::Client, creds: RedditCredentials) -> Self {
        Self {
            http,
            creds,
            token: Mutex::new(None),
        }
    }

    async fn bearer(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_MARGIN {
                return Ok(token.value.clone());
            }
        }
        info!("Retrieving Reddit API token.");
        let fresh = self.request_token().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        info!("Reddit API token retrieved successfully.");
        Ok(value)
    }

    async fn request_token(&self) -> Result<CachedToken> {
        let resp = self
            .http
            .post(AUTH_URL)
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.creds.username.as_str()),
                ("password", self.creds.password.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HarvestError::Api {
                message: format!("token request failed with HTTP {}", status.as_u16()),
            });
        }
        let body: TokenResponse = resp.json().await?;
        if let Some(err) = body.error {
            return Err(HarvestError::Config(format!("Reddit rejected credentials: {err}")));
        }
        let value = body
            .access_token
            .ok_or_else(|| HarvestError::MissingField("access_token".into()))?;
        let ttl = Duration::from_secs(body.expires_in.unwrap_or(3600));
        Ok(CachedToken {
            value,
            expires_at: Instant::now() + ttl,
        })
    }

    async fn check(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(HarvestError::RateLimited {
                message: format!("Reddit answered 429 for {}", resp.url()),
            });
        }
        if !status.is_success() {
            return Err(HarvestError::Api {
                message: format!("Reddit answered HTTP {} for {}", status.as_u16(), resp.url()),
            });
        }
        Ok(resp.json().await?)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        Self::check(resp).await
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<Value> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .form(form)
            .send()
            .await?;
        Self::check(resp).await
    }

    async fn upload_asset(&self, lease: &UploadLease, image: &Path, mime: &str) -> Result<String> {
        let bytes = tokio::fs::read(image).await?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());

        let mut form = reqwest::multipart::Form::new();
        for (k, v) in &lease.fields {
            form = form.text(k.clone(), v.clone());
        }
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)?;
        form = form.part("file", part);

        let resp = self
            .http
            .post(&lease.action)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(HarvestError::Api {
                message: format!("asset upload failed with HTTP {}", resp.status().as_u16()),
            });
        }
        lease
            .asset_url()
            .ok_or_else(|| HarvestError::MissingField("upload lease key".into()))
    }

    /// Image submissions often come back without an id; find the post on the account's listing.
    async fn find_own_submission(&self, subreddit: &str, title: &str) -> Result<SubmissionRef> {
        let path = format!("/user/{}/submitted", self.creds.username);
        for attempt in 1..=SUBMISSION_LOOKUP_ATTEMPTS {
            let listing = self
                .get_json(&path, &[("limit", "10".into()), ("sort", "new".into()), ("raw_json", "1".into())])
                .await?;
            if let Some(found) = find_submission_in_listing(&listing, subreddit, title) {
                return Ok(found);
            }
            debug!("Submission not visible yet (attempt {})", attempt);
            tokio::time::sleep(SUBMISSION_LOOKUP_DELAY).await;
        }
        Err(HarvestError::SubmissionUnconfirmed {
            message: format!("submitted '{title}' but could not find it on the account listing"),
        })
    }
}

#[async_trait]
impl PostSource for RedditClient {
    #[instrument(skip(self))]
    async fn search(
        &self,
        subreddit: &str,
        term: &str,
        page_size: usize,
        continuation: Option<&str>,
    ) -> Result<Vec<SourcePost>> {
        let mut query = vec![
            ("q", term.to_string()),
            ("restrict_sr", "1".to_string()),
            ("sort", "new".to_string()),
            ("limit", page_size.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = continuation {
            query.push(("after", after.to_string()));
        }
        let listing = self.get_json(&format!("/r/{subreddit}/search"), &query).await?;
        parse_listing(&listing)
    }
}

#[async_trait]
impl SubmissionTarget for RedditClient {
    async fn link_flairs(&self, subreddit: &str) -> Result<Vec<FlairTemplate>> {
        let value = self
            .get_json(&format!("/r/{subreddit}/api/link_flair_v2"), &[])
            .await?;
        parse_flairs(&value)
    }

    #[instrument(skip(self))]
    async fn submit_image(
        &self,
        subreddit: &str,
        title: &str,
        image: &Path,
        flair_id: Option<&str>,
    ) -> Result<SubmissionRef> {
        let mime = image_mime(image).ok_or_else(|| HarvestError::Api {
            message: format!("unsupported image type: {}", image.display()),
        })?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let lease_value = self
            .post_form(
                "/api/media/asset.json",
                &[("filepath", file_name), ("mimetype", mime.to_string())],
            )
            .await?;
        let lease = parse_upload_lease(&lease_value)?;
        let asset_url = self.upload_asset(&lease, image, mime).await?;

        let mut form = vec![
            ("sr", subreddit.to_string()),
            ("kind", "image".to_string()),
            ("title", title.to_string()),
            ("url", asset_url),
            ("api_type", "json".to_string()),
            ("resubmit", "true".to_string()),
        ];
        if let Some(id) = flair_id {
            form.push(("flair_id", id.to_string()));
        }
        let submitted = self.post_form("/api/submit", &form).await?;
        match parse_submit_response(&submitted)? {
            Some(found) => Ok(found),
            None => {
                warn!("Submit response carried no id, looking the post up");
                self.find_own_submission(subreddit, title).await
            }
        }
    }

    async fn reply(&self, submission: &SubmissionRef, text: &str) -> Result<()> {
        let value = self
            .post_form(
                "/api/comment",
                &[
                    ("thing_id", submission.name.clone()),
                    ("text", text.to_string()),
                    ("api_type", "json".to_string()),
                ],
            )
            .await?;
        json_errors(&value)
    }
}

pub fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Posts of a `Listing`. Children missing a required field are skipped.
pub fn parse_listing(listing: &Value) -> Result<Vec<SourcePost>> {
    let children = listing["data"]["children"]
        .as_array()
        .ok_or_else(|| HarvestError::MissingField("data.children not found".into()))?;

    let mut posts = Vec::with_capacity(children.len());
    for child in children {
        let data = &child["data"];
        let (Some(id), Some(title), Some(url), Some(created)) = (
            data["name"].as_str(),
            data["title"].as_str(),
            data["url"].as_str(),
            data["created_utc"].as_f64(),
        ) else {
            debug!("Skipping malformed listing child");
            continue;
        };
        let Some(created_utc) = DateTime::<Utc>::from_timestamp(created as i64, 0) else {
            continue;
        };
        posts.push(SourcePost {
            id: id.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            created_utc,
        });
    }
    Ok(posts)
}

pub fn parse_flairs(value: &Value) -> Result<Vec<FlairTemplate>> {
    let items = value
        .as_array()
        .ok_or_else(|| HarvestError::MissingField("flair template list".into()))?;
    Ok(items
        .iter()
        .filter_map(|f| {
            Some(FlairTemplate {
                id: f["id"].as_str()?.to_string(),
                text: f["text"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect())
}

pub fn parse_upload_lease(value: &Value) -> Result<UploadLease> {
    let args = &value["args"];
    let action = args["action"]
        .as_str()
        .ok_or_else(|| HarvestError::MissingField("args.action".into()))?;
    let action = if action.starts_with("//") {
        format!("https:{action}")
    } else {
        action.to_string()
    };
    let fields = args["fields"]
        .as_array()
        .ok_or_else(|| HarvestError::MissingField("args.fields".into()))?
        .iter()
        .filter_map(|f| Some((f["name"].as_str()?.to_string(), f["value"].as_str()?.to_string())))
        .collect();
    Ok(UploadLease { action, fields })
}

fn json_errors(value: &Value) -> Result<()> {
    match value["json"]["errors"].as_array() {
        Some(errors) if !errors.is_empty() => Err(HarvestError::Api {
            message: format!("Reddit returned errors: {}", Value::Array(errors.clone())),
        }),
        _ => Ok(()),
    }
}

/// `Ok(None)` when the submission was accepted but no id came back.
pub fn parse_submit_response(value: &Value) -> Result<Option<SubmissionRef>> {
    json_errors(value)?;
    let data = &value["json"]["data"];
    let name = data["name"]
        .as_str()
        .map(str::to_string)
        .or_else(|| data["id"].as_str().map(|id| format!("t3_{}", id.trim_start_matches("t3_"))));
    Ok(name.map(|name| SubmissionRef {
        name,
        permalink: data["url"].as_str().map(str::to_string),
    }))
}

pub fn find_submission_in_listing(listing: &Value, subreddit: &str, title: &str) -> Option<SubmissionRef> {
    listing["data"]["children"].as_array()?.iter().find_map(|child| {
        let data = &child["data"];
        let same_sub = data["subreddit"]
            .as_str()
            .map(|s| s.eq_ignore_ascii_case(subreddit))
            .unwrap_or(false);
        if same_sub && data["title"].as_str() == Some(title) {
            Some(SubmissionRef {
                name: data["name"].as_str()?.to_string(),
                permalink: data["permalink"].as_str().map(str::to_string),
            })
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_listing() {
        let listing = json!({
            "kind": "Listing",
            "data": {
                "after": "t3_b",
                "children": [
                    {"kind": "t3", "data": {"name": "t3_a", "title": "Sunset", "url": "https://i.redd.it/a.jpg", "created_utc": 1709622489.0}},
                    {"kind": "t3", "data": {"name": "t3_x", "title": "No url"}},
                    {"kind": "t3", "data": {"name": "t3_b", "title": "Gallery", "url": "https://www.reddit.com/gallery/b", "created_utc": 1709622000}}
                ]
            }
        });
        let posts = parse_listing(&listing).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "t3_a");
        assert_eq!(posts[0].created_utc.timestamp(), 1709622489);
        assert_eq!(posts[1].url, "https://www.reddit.com/gallery/b");
    }

    #[test]
    fn test_parse_listing_requires_children() {
        assert!(parse_listing(&json!({"data": {}})).is_err());
        assert!(parse_listing(&json!({"data": {"children": []}})).unwrap().is_empty());
    }

    #[test]
    fn test_parse_flairs() {
        let value = json!([
            {"id": "f-1", "text": "Events", "type": "text"},
            {"id": "f-2", "text": null},
            {"text": "orphan"}
        ]);
        let flairs = parse_flairs(&value).unwrap();
        assert_eq!(
            flairs,
            vec![
                FlairTemplate { id: "f-1".into(), text: "Events".into() },
                FlairTemplate { id: "f-2".into(), text: "".into() },
            ]
        );
    }

    #[test]
    fn test_parse_upload_lease() {
        let value = json!({
            "args": {
                "action": "//reddit-uploaded-media.s3-accelerate.amazonaws.com",
                "fields": [
                    {"name": "key", "value": "rte_images/abc.jpg"},
                    {"name": "policy", "value": "p"}
                ]
            },
            "asset": {"asset_id": "abc"}
        });
        let lease = parse_upload_lease(&value).unwrap();
        assert_eq!(lease.action, "https://reddit-uploaded-media.s3-accelerate.amazonaws.com");
        assert_eq!(lease.fields.len(), 2);
        assert_eq!(
            lease.asset_url().unwrap(),
            "https://reddit-uploaded-media.s3-accelerate.amazonaws.com/rte_images/abc.jpg"
        );
    }

    #[test]
    fn test_parse_submit_response() {
        let ok = json!({"json": {"errors": [], "data": {"name": "t3_zz", "url": "https://reddit.com/r/x/zz"}}});
        assert_eq!(parse_submit_response(&ok).unwrap().unwrap().name, "t3_zz");

        let id_only = json!({"json": {"errors": [], "data": {"id": "yy"}}});
        assert_eq!(parse_submit_response(&id_only).unwrap().unwrap().name, "t3_yy");

        let pending = json!({"json": {"errors": [], "data": {"websocket_url": "wss://x"}}});
        assert!(parse_submit_response(&pending).unwrap().is_none());

        let failed = json!({"json": {"errors": [["RATELIMIT", "slow down", "ratelimit"]]}});
        assert!(parse_submit_response(&failed).is_err());
    }

    #[test]
    fn test_find_submission_in_listing() {
        let listing = json!({"data": {"children": [
            {"data": {"name": "t3_1", "title": "Gig tonight", "subreddit": "Other"}},
            {"data": {"name": "t3_2", "title": "Gig tonight", "subreddit": "Trivandrum", "permalink": "/r/Trivandrum/2"}}
        ]}});
        let found = find_submission_in_listing(&listing, "trivandrum", "Gig tonight").unwrap();
        assert_eq!(found.name, "t3_2");
        assert!(find_submission_in_listing(&listing, "Trivandrum", "Other title").is_none());
    }

    #[test]
    fn test_image_mime() {
        assert_eq!(image_mime(Path::new("a/b.JPG")), Some("image/jpeg"));
        assert_eq!(image_mime(Path::new("a/b.png")), Some("image/png"));
        assert_eq!(image_mime(Path::new("a/b.mp4")), None);
    }
}
