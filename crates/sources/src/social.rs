//! Social post search with proxy and identity rotation
//!
//! Each lookup borrows one proxy and one identity header set. Response
//! statuses decide which pool takes the blame:
//!
//! | Status | Action |
//! |---|---|
//! | 429 | back off per the rate-limit table and retry with fresh resources |
//! | 401, 403 | identity error |
//! | 407, 5xx, transport failure | proxy error |
//! | other non-2xx | lookup failed, nobody blamed |

use std::sync::Arc;
use std::time::Duration;

use common::BoxFuture;
use harvest::{Author, Completeness, LookupError, Post, SearchResult, SecondaryLookup};
use pagination::RetryPolicy;
use reqwest::Url;
use resource_pool::RotatingPool;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::endpoint::{IdentityHeaders, ProxyEndpoint};
use crate::error::{Error, Result};

/// GraphQL feature switches the search endpoint insists on.
const SEARCH_FEATURES: &[(&str, bool)] = &[
    ("profile_label_improvements_pcf_label_in_post_enabled", true),
    ("rweb_tipjar_consumption_enabled", true),
    ("responsive_web_graphql_exclude_directive_enabled", true),
    ("verified_phone_label_enabled", false),
    ("creator_subscriptions_tweet_preview_api_enabled", true),
    ("responsive_web_graphql_timeline_navigation_enabled", true),
    ("responsive_web_graphql_skip_user_profile_image_extensions_enabled", false),
    ("premium_content_api_read_enabled", false),
    ("communities_web_enable_tweet_community_results_fetch", true),
    ("c9s_tweet_anatomy_moderator_badge_enabled", true),
    ("articles_preview_enabled", true),
    ("responsive_web_edit_tweet_api_enabled", true),
    ("graphql_is_translatable_rweb_tweet_is_translatable_enabled", true),
    ("view_counts_everywhere_api_enabled", true),
    ("longform_notetweets_consumption_enabled", true),
    ("responsive_web_twitter_article_tweet_consumption_enabled", true),
    ("tweet_awards_web_tipping_enabled", false),
    ("freedom_of_speech_not_reach_fetch_enabled", true),
    ("standardized_nudges_misinfo", true),
    ("tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled", true),
    ("rweb_video_timestamps_enabled", true),
    ("longform_notetweets_rich_text_read_enabled", true),
    ("longform_notetweets_inline_media_enabled", true),
    ("responsive_web_enhance_cards_enabled", false),
];

/// Which pool a failed response is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFault {
    RateLimited,
    Identity,
    Proxy,
    Upstream,
}

/// `None` for success statuses.
pub fn classify_status(status: u16) -> Option<StatusFault> {
    match status {
        200..=299 => None,
        429 => Some(StatusFault::RateLimited),
        401 | 403 => Some(StatusFault::Identity),
        407 | 500..=599 => Some(StatusFault::Proxy),
        _ => Some(StatusFault::Upstream),
    }
}

#[derive(Debug, Clone)]
pub struct SocialSettings {
    pub base_url: String,
    pub page_size: u32,
    pub timeout: Duration,
    /// Attempt budget and delays for 429 responses.
    pub rate_limit: RetryPolicy,
}

pub struct SocialLookup {
    proxies: Arc<RotatingPool<ProxyEndpoint>>,
    identities: Arc<RotatingPool<IdentityHeaders>>,
    endpoint: Url,
    features: String,
    page_size: u32,
    timeout: Duration,
    rate_limit: RetryPolicy,
}

impl SocialLookup {
    pub fn new(
        proxies: Arc<RotatingPool<ProxyEndpoint>>,
        identities: Arc<RotatingPool<IdentityHeaders>>,
        settings: SocialSettings,
    ) -> Result<Self> {
        let endpoint = Url::parse(&settings.base_url).map_err(|e| Error::InvalidUrl {
            url: settings.base_url.clone(),
            reason: e.to_string(),
        })?;
        let features: Map<String, Value> = SEARCH_FEATURES
            .iter()
            .map(|(name, enabled)| (name.to_string(), Value::Bool(*enabled)))
            .collect();
        Ok(Self {
            proxies,
            identities,
            endpoint,
            features: Value::Object(features).to_string(),
            page_size: settings.page_size,
            timeout: settings.timeout,
            rate_limit: settings.rate_limit,
        })
    }

    fn search_url(&self, query: &str) -> Url {
        let variables = json!({
            "rawQuery": query,
            "count": self.page_size,
            "querySource": "typed_query",
            "product": "Latest",
        });
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("variables", &variables.to_string())
            .append_pair("features", &self.features);
        url
    }

    async fn search_posts(
        &self,
        address: &str,
    ) -> std::result::Result<Option<SearchResult>, LookupError> {
        let url = self.search_url(address);
        let attempts = self.rate_limit.max_attempts();

        for attempt in 1..=attempts {
            // Identity first: its cap reset is free, a proxy's costs a probe.
            let Some(identity) = self.identities.acquire().await else {
                return Err(LookupError::ResourcesExhausted);
            };
            let Some(proxy) = self.proxies.acquire().await else {
                return Err(LookupError::ResourcesExhausted);
            };

            let sent = proxy
                .payload()
                .client()
                .get(url.clone())
                .headers(identity.payload().headers().clone())
                .timeout(self.timeout)
                .send()
                .await;
            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    self.proxies.report_error(proxy.id()).await;
                    return Err(LookupError::Failed(format!(
                        "search request via {} failed: {e}",
                        proxy.payload().label()
                    )));
                }
            };

            let status = response.status();
            match classify_status(status.as_u16()) {
                None => {
                    let body = response.text().await.map_err(|e| {
                        LookupError::Failed(format!("failed to read search body: {e}"))
                    })?;
                    let result = decode_timeline(&body).map_err(LookupError::Failed)?;
                    debug!(address, posts = result.posts.len(), "search complete");
                    return Ok((!result.posts.is_empty()).then_some(result));
                }
                Some(StatusFault::RateLimited) => {
                    if !self.rate_limit.should_retry(attempt) {
                        break;
                    }
                    let delay = self.rate_limit.backoff.delay_after(attempt);
                    warn!(
                        address,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "search rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Some(StatusFault::Identity) => {
                    self.identities.report_error(identity.id()).await;
                    return Err(LookupError::Failed(format!(
                        "identity {} rejected with {status}",
                        identity.id()
                    )));
                }
                Some(StatusFault::Proxy) => {
                    self.proxies.report_error(proxy.id()).await;
                    return Err(LookupError::Failed(format!(
                        "search via {} returned {status}",
                        proxy.payload().label()
                    )));
                }
                Some(StatusFault::Upstream) => {
                    return Err(LookupError::Failed(format!(
                        "search endpoint returned {status}"
                    )));
                }
            }
        }

        Err(LookupError::Failed(format!(
            "still rate limited after {attempts} attempts"
        )))
    }
}

impl SecondaryLookup for SocialLookup {
    fn search<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Option<SearchResult>, LookupError>> {
        Box::pin(self.search_posts(address))
    }
}

/// Decode a search-timeline body into posts, newest first.
///
/// Entries that are not posts (cursors, modules) are skipped. A post without
/// text is dropped; other missing fields degrade the post.
pub fn decode_timeline(body: &str) -> std::result::Result<SearchResult, String> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| format!("search body is not JSON: {e}"))?;
    let instructions = root
        .pointer("/data/search_by_raw_query/search_timeline/timeline/instructions")
        .and_then(Value::as_array)
        .ok_or_else(|| "search body has no timeline instructions".to_string())?;

    let posts = instructions
        .iter()
        .filter_map(|instruction| instruction.get("entries").and_then(Value::as_array))
        .flatten()
        .filter_map(decode_entry)
        .collect();
    Ok(SearchResult { posts })
}

fn decode_entry(entry: &Value) -> Option<Post> {
    decode_post(entry.pointer("/content/itemContent/tweet_results/result")?)
}

/// Decode one `tweet_results.result`, unwrapping visibility wrappers.
pub fn decode_post(result: &Value) -> Option<Post> {
    let post = result.get("tweet").unwrap_or(result);
    let legacy = post.get("legacy")?;
    let text = str_field(legacy, "full_text")?;

    let mut missing = Vec::new();
    let id = match str_field(post, "rest_id") {
        Some(id) => id.to_string(),
        None => {
            missing.push("id");
            String::new()
        }
    };
    let created_at = str_field(legacy, "created_at").map(String::from);
    if created_at.is_none() {
        missing.push("created_at");
    }
    let author = decode_author(post, &mut missing);

    Some(Post {
        id,
        text: text.to_string(),
        created_at,
        author,
        completeness: Completeness::from_missing(missing),
    })
}

fn decode_author(post: &Value, missing: &mut Vec<&'static str>) -> Author {
    let Some(user) = post
        .pointer("/core/user_results/result")
        .or_else(|| post.pointer("/user_results/result"))
    else {
        missing.push("author");
        return Author::default();
    };
    let legacy = user.get("legacy");

    let handle = nested_str(legacy, "screen_name")
        .or_else(|| user.pointer("/core/screen_name")?.as_str());
    if handle.is_none() {
        missing.push("author.handle");
    }
    let display_name =
        nested_str(legacy, "name").or_else(|| user.pointer("/core/name")?.as_str());
    if display_name.is_none() {
        missing.push("author.name");
    }
    let followers = legacy
        .and_then(|legacy| legacy.get("followers_count"))
        .and_then(Value::as_u64);
    if followers.is_none() {
        missing.push("author.followers");
    }
    let can_dm = legacy
        .and_then(|legacy| legacy.get("can_dm"))
        .or_else(|| user.pointer("/dm_permissions/can_dm"))
        .and_then(Value::as_bool);
    if can_dm.is_none() {
        missing.push("author.can_dm");
    }

    Author {
        handle: handle.unwrap_or_default().to_string(),
        display_name: display_name.unwrap_or_default().to_string(),
        followers: followers.unwrap_or(0),
        can_dm: can_dm.unwrap_or(false),
    }
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str)
}

fn nested_str<'v>(parent: Option<&'v Value>, key: &str) -> Option<&'v str> {
    parent.and_then(|value| str_field(value, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeUpstream, timeline_body};
    use pagination::Backoff;
    use resource_pool::{AlwaysHealthy, PoolSettings, ResourceId};

    fn pools(
        proxy_url: &str,
        identity_threshold: u32,
    ) -> (
        Arc<RotatingPool<ProxyEndpoint>>,
        Arc<RotatingPool<IdentityHeaders>>,
    ) {
        let proxies = RotatingPool::new(
            "proxies",
            vec![ProxyEndpoint::new(proxy_url).unwrap()],
            PoolSettings {
                request_cap: 100,
                error_threshold: 3,
            },
            Arc::new(AlwaysHealthy),
        )
        .unwrap();
        let identities = RotatingPool::new(
            "identities",
            vec![IdentityHeaders::new([("authorization", "Bearer t")]).unwrap()],
            PoolSettings {
                request_cap: 50,
                error_threshold: identity_threshold,
            },
            Arc::new(AlwaysHealthy),
        )
        .unwrap();
        (Arc::new(proxies), Arc::new(identities))
    }

    fn lookup(
        proxies: Arc<RotatingPool<ProxyEndpoint>>,
        identities: Arc<RotatingPool<IdentityHeaders>>,
        attempts: u32,
    ) -> SocialLookup {
        SocialLookup::new(
            proxies,
            identities,
            SocialSettings {
                base_url: "http://search.test/graphql/SearchTimeline".into(),
                page_size: 20,
                timeout: Duration::from_secs(5),
                rate_limit: RetryPolicy::new(attempts, Backoff::Table(vec![Duration::from_millis(5)])),
            },
        )
        .unwrap()
    }

    #[test]
    fn status_faults_pick_the_right_pool() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(429), Some(StatusFault::RateLimited));
        assert_eq!(classify_status(401), Some(StatusFault::Identity));
        assert_eq!(classify_status(403), Some(StatusFault::Identity));
        assert_eq!(classify_status(407), Some(StatusFault::Proxy));
        assert_eq!(classify_status(502), Some(StatusFault::Proxy));
        assert_eq!(classify_status(404), Some(StatusFault::Upstream));
    }

    #[test]
    fn decodes_complete_posts() {
        let result = decode_timeline(&timeline_body(&["first post", "second post"])).unwrap();
        assert_eq!(result.posts.len(), 2);

        let post = &result.posts[0];
        assert_eq!(post.text, "first post");
        assert_eq!(post.id, "100");
        assert_eq!(post.author.handle, "alice");
        assert_eq!(post.author.followers, 42);
        assert!(post.author.can_dm);
        assert!(post.completeness.is_complete());
    }

    #[test]
    fn missing_optional_fields_degrade_instead_of_failing() {
        let result = json!({
            "__typename": "TweetWithVisibilityResults",
            "tweet": {
                "legacy": {"full_text": "wallet in bio"},
                "core": {"user_results": {"result": {
                    "core": {"screen_name": "bob"},
                    "legacy": {}
                }}}
            }
        });
        let post = decode_post(&result).unwrap();

        assert_eq!(post.author.handle, "bob");
        assert!(!post.author.can_dm);
        match post.completeness {
            Completeness::Degraded { missing } => {
                assert!(missing.contains(&"id"));
                assert!(missing.contains(&"created_at"));
                assert!(missing.contains(&"author.followers"));
                assert!(missing.contains(&"author.can_dm"));
                assert!(!missing.contains(&"author.handle"));
            }
            Completeness::Complete => panic!("expected degraded post"),
        }
    }

    #[test]
    fn posts_without_text_and_non_post_entries_are_skipped() {
        let body = json!({"data": {"search_by_raw_query": {"search_timeline": {"timeline": {
            "instructions": [
                {"type": "TimelineClearCache"},
                {"type": "TimelineAddEntries", "entries": [
                    {"entryId": "cursor-top", "content": {"value": "abc"}},
                    {"entryId": "tweet-1", "content": {"itemContent": {"tweet_results": {"result": {
                        "rest_id": "1", "legacy": {}
                    }}}}}
                ]}
            ]
        }}}}});
        let result = decode_timeline(&body.to_string()).unwrap();
        assert!(result.posts.is_empty());
    }

    #[test]
    fn wrong_shape_is_an_error() {
        assert!(decode_timeline(r#"{"errors": [{"message": "denied"}]}"#).is_err());
        assert!(decode_timeline("not json").is_err());
    }

    #[test]
    fn search_url_carries_query_and_features() {
        let (proxies, identities) = pools("http://127.0.0.1:9", 7);
        let lookup = lookup(proxies, identities, 5);
        let url = lookup.search_url("Wallet111");

        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        let variables: Value = serde_json::from_str(&pairs["variables"]).unwrap();
        assert_eq!(variables["rawQuery"], "Wallet111");
        assert_eq!(variables["count"], 20);
        assert_eq!(variables["product"], "Latest");
        let features: Value = serde_json::from_str(&pairs["features"]).unwrap();
        assert_eq!(features["verified_phone_label_enabled"], false);
    }

    #[tokio::test]
    async fn rate_limit_backs_off_then_succeeds() {
        let upstream = FakeUpstream::start(vec![
            (429, String::new()),
            (429, String::new()),
            (200, timeline_body(&["gm"])),
        ])
        .await;
        let (proxies, identities) = pools(&upstream.url(), 7);
        let lookup = lookup(proxies.clone(), identities, 5);

        let result = lookup.search("Wallet111").await.unwrap().unwrap();

        assert_eq!(result.posts[0].text, "gm");
        assert_eq!(upstream.hits(), 3);
        let proxy = proxies.snapshot(ResourceId::from_index(0)).await.unwrap();
        assert_eq!(proxy.error_count, 0, "429 is not charged to the proxy");
    }

    #[tokio::test]
    async fn rate_limit_budget_is_bounded() {
        let upstream = FakeUpstream::start(vec![(429, String::new()); 10]).await;
        let (proxies, identities) = pools(&upstream.url(), 7);
        let lookup = lookup(proxies, identities, 3);

        let err = lookup.search("Wallet111").await.unwrap_err();

        assert!(matches!(err, LookupError::Failed(_)));
        assert_eq!(upstream.hits(), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_charged_to_the_identity() {
        let upstream = FakeUpstream::start(vec![(401, String::new())]).await;
        let (proxies, identities) = pools(&upstream.url(), 1);
        let lookup = lookup(proxies.clone(), identities.clone(), 5);

        assert!(matches!(
            lookup.search("Wallet111").await,
            Err(LookupError::Failed(_))
        ));
        assert_eq!(identities.health().await.disabled, 1);
        assert_eq!(proxies.health().await.active, 1);

        // The only identity is now disabled.
        assert_eq!(
            lookup.search("Wallet111").await,
            Err(LookupError::ResourcesExhausted)
        );
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn exhausted_identities_leave_proxy_usage_untouched() {
        let upstream = FakeUpstream::start(vec![(401, String::new())]).await;
        let (proxies, identities) = pools(&upstream.url(), 1);
        let lookup = lookup(proxies.clone(), identities.clone(), 5);

        assert!(lookup.search("Wallet111").await.is_err());
        let proxy_id = ResourceId::from_index(0);
        assert_eq!(proxies.snapshot(proxy_id).await.unwrap().usage_count, 1);

        for _ in 0..3 {
            assert_eq!(
                lookup.search("Wallet111").await,
                Err(LookupError::ResourcesExhausted)
            );
        }
        assert_eq!(proxies.snapshot(proxy_id).await.unwrap().usage_count, 1);
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_charged_to_the_proxy() {
        let upstream = FakeUpstream::start(vec![(503, String::new())]).await;
        let (proxies, identities) = pools(&upstream.url(), 7);
        let lookup = lookup(proxies.clone(), identities.clone(), 5);

        assert!(lookup.search("Wallet111").await.is_err());
        let proxy = proxies.snapshot(ResourceId::from_index(0)).await.unwrap();
        assert_eq!(proxy.error_count, 1);
        let identity = identities.snapshot(ResourceId::from_index(0)).await.unwrap();
        assert_eq!(identity.error_count, 0);
    }

    #[tokio::test]
    async fn empty_timeline_is_none() {
        let upstream = FakeUpstream::start(vec![(200, timeline_body(&[]))]).await;
        let (proxies, identities) = pools(&upstream.url(), 7);
        let lookup = lookup(proxies, identities, 5);

        assert_eq!(lookup.search("Wallet111").await, Ok(None));
    }
}
