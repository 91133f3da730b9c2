use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::app::ports::ProfileSource;
use crate::config::InstagramCredentials;
use crate::error::{HarvestError, Result};
use crate::types::{MediaKind, MediaNode, ProfilePage, ProfilePost};

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";
const MEDIA_FIELDS: &str =
    "id,caption,media_type,media_url,permalink,timestamp,children{media_type,media_url}";

// Graph API error codes that mean "slow down"
const THROTTLE_CODES: &[i64] = &[4, 17, 32, 613];

/// Reads another account's recent media through Graph API business discovery.
pub struct InstagramClient {
    http: reqwest::Client,
    creds: InstagramCredentials,
}

impl InstagramClient {
    pub fn new(http: reqwest::Client, creds: InstagramCredentials) -> Self {
        Self { http, creds }
    }

    fn discovery_fields(profile: &str, page_size: usize, cursor: Option<&str>) -> String {
        let mut media = format!("media.limit({page_size})");
        if let Some(after) = cursor {
            media.push_str(&format!(".after({after})"));
        }
        format!("business_discovery.username({profile}){{{media}{{{MEDIA_FIELDS}}}}}")
    }
}

#[async_trait]
impl ProfileSource for InstagramClient {
    #[instrument(skip(self))]
    async fn posts_page(
        &self,
        profile: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<ProfilePage> {
        let fields = Self::discovery_fields(profile, page_size, cursor);
        let resp = self
            .http
            .get(format!("{GRAPH_BASE}/{}", self.creds.user_id))
            .query(&[("fields", fields.as_str()), ("access_token", self.creds.access_token.as_str())])
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body: Value = resp.json().await?;
        if let Some(err) = graph_error(status, &body) {
            return Err(err);
        }
        let page = parse_media_page(&body["business_discovery"]["media"])?;
        debug!("Fetched {} posts for {}", page.posts.len(), profile);
        Ok(page)
    }
}

fn graph_error(status: u16, body: &Value) -> Option<HarvestError> {
    let error = &body["error"];
    if status == 429 || error["code"].as_i64().map(|c| THROTTLE_CODES.contains(&c)).unwrap_or(false) {
        return Some(HarvestError::RateLimited {
            message: error["message"].as_str().unwrap_or("Graph API throttled").to_string(),
        });
    }
    if !(200..=299).contains(&status) || !error.is_null() {
        return Some(HarvestError::Api {
            message: format!(
                "Graph API HTTP {}: {}",
                status,
                error["message"].as_str().unwrap_or("unknown error")
            ),
        });
    }
    None
}

fn media_kind(media_type: &str) -> Option<MediaKind> {
    match media_type {
        "IMAGE" | "CAROUSEL_ALBUM" => Some(MediaKind::Image),
        "VIDEO" | "REELS" => Some(MediaKind::Video),
        _ => None,
    }
}

fn media_node(item: &Value) -> Option<MediaNode> {
    Some(MediaNode {
        url: item["media_url"].as_str()?.to_string(),
        kind: media_kind(item["media_type"].as_str()?)?,
    })
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// One `media` edge: posts newest first, plus the cursor when another page exists.
pub fn parse_media_page(media: &Value) -> Result<ProfilePage> {
    let data = media["data"]
        .as_array()
        .ok_or_else(|| HarvestError::MissingField("media.data".into()))?;

    let mut posts = Vec::with_capacity(data.len());
    for item in data {
        let (Some(id), Some(taken_at)) = (
            item["id"].as_str(),
            item["timestamp"].as_str().and_then(parse_timestamp),
        ) else {
            debug!("Skipping media item without id/timestamp");
            continue;
        };

        let media: Vec<MediaNode> = match item["children"]["data"].as_array() {
            Some(children) if item["media_type"] == "CAROUSEL_ALBUM" => {
                children.iter().filter_map(media_node).collect()
            }
            _ => media_node(item).into_iter().collect(),
        };

        posts.push(ProfilePost {
            id: id.to_string(),
            permalink: item["permalink"].as_str().unwrap_or_default().to_string(),
            caption: item["caption"].as_str().map(str::to_string),
            taken_at,
            media,
        });
    }

    let next_cursor = if media["paging"]["next"].is_string() {
        media["paging"]["cursors"]["after"].as_str().map(str::to_string)
    } else {
        None
    };
    Ok(ProfilePage { posts, next_cursor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_discovery_fields() {
        let fields = InstagramClient::discovery_fields("tvm", 25, Some("QVFI"));
        assert_eq!(
            fields,
            "business_discovery.username(tvm){media.limit(25).after(QVFI){id,caption,media_type,media_url,permalink,timestamp,children{media_type,media_url}}}"
        );
    }

    #[test]
    fn test_parse_media_page() {
        let media = json!({
            "data": [
                {
                    "id": "1", "media_type": "CAROUSEL_ALBUM", "caption": "Gig night",
                    "permalink": "https://www.instagram.com/p/AAA/",
                    "timestamp": "2024-03-05T07:08:09+0000",
                    "children": {"data": [
                        {"media_type": "IMAGE", "media_url": "https://cdn/1a.jpg"},
                        {"media_type": "VIDEO", "media_url": "https://cdn/1b.mp4"}
                    ]}
                },
                {
                    "id": "2", "media_type": "IMAGE", "media_url": "https://cdn/2.jpg",
                    "permalink": "https://www.instagram.com/p/BBB/",
                    "timestamp": "2024-03-04T10:00:00+0000"
                },
                {"id": "3", "media_type": "IMAGE"}
            ],
            "paging": {"cursors": {"after": "CUR"}, "next": "https://graph.facebook.com/..."}
        });
        let page = parse_media_page(&media).unwrap();
        assert_eq!(page.posts.len(), 2);
        assert!(page.posts[0].is_carousel());
        assert_eq!(page.posts[0].media[1].kind, MediaKind::Video);
        assert_eq!(page.posts[0].caption.as_deref(), Some("Gig night"));
        assert_eq!(page.posts[1].media.len(), 1);
        assert!(page.posts[1].caption.is_none());
        assert_eq!(page.next_cursor.as_deref(), Some("CUR"));
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let media = json!({"data": [], "paging": {"cursors": {"after": "END"}}});
        let page = parse_media_page(&media).unwrap();
        assert!(page.posts.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_graph_error_classification() {
        let throttled = json!({"error": {"code": 4, "message": "Application request limit reached"}});
        assert!(matches!(graph_error(400, &throttled), Some(HarvestError::RateLimited { .. })));

        let denied = json!({"error": {"code": 190, "message": "Invalid OAuth access token"}});
        assert!(matches!(graph_error(400, &denied), Some(HarvestError::Api { .. })));

        assert!(graph_error(200, &json!({"business_discovery": {}})).is_none());
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2024-03-05T07:08:09+0000").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-05T07:08:09+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }
}
