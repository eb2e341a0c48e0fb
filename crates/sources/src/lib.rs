//! Concrete collaborators for the holder harvest
//!
//! - `ProxyEndpoint` / `IdentityHeaders`: payloads pooled by `RotatingPool`
//! - `HttpProbe`: cap-cycle liveness check for proxies
//! - `HolderPageSource`: Solscan holder pages for `PaginatedFetcher`
//! - `SocialLookup`: post search with proxy + identity rotation
//! - `AddressMentionClassifier`: accepts posts that publish a wallet address
//! - `RpcValuation`: SOL and SPL balances priced in USD
//!
//! Every upstream JSON shape is decoded here by an explicit function; nothing
//! untyped leaves this crate.

pub mod classifier;
pub mod endpoint;
pub mod error;
pub mod holders;
pub mod probe;
pub mod social;
pub mod valuation;

pub use classifier::AddressMentionClassifier;
pub use endpoint::{IdentityHeaders, ProxyEndpoint, header_map};
pub use error::{Error, Result};
pub use holders::HolderPageSource;
pub use probe::HttpProbe;
pub use social::{SocialLookup, SocialSettings};
pub use valuation::{RpcValuation, ValuationSettings};

#[cfg(test)]
pub(crate) mod test_support {
    //! Plain-TCP upstream that answers each connection with the next canned
    //! response. Configured as a proxy, it receives every request regardless
    //! of target host.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub(crate) struct FakeUpstream {
        addr: std::net::SocketAddr,
        hits: Arc<AtomicUsize>,
    }

    impl FakeUpstream {
        pub(crate) async fn start(responses: Vec<(u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&hits);

            tokio::spawn(async move {
                let mut responses = responses.into_iter();
                while let Ok((mut socket, _)) = listener.accept().await {
                    let (status, body) = responses
                        .next()
                        .unwrap_or((500, "no more canned responses".into()));
                    counter.fetch_add(1, Ordering::SeqCst);

                    // Read headers and any content-length body before answering.
                    let mut request = Vec::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        let Ok(n) = socket.read(&mut buf).await else { break };
                        if n == 0 {
                            break;
                        }
                        request.extend_from_slice(&buf[..n]);
                        if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                            if request.len() >= end + 4 + content_length(&request[..end]) {
                                break;
                            }
                        }
                    }

                    let response = format!(
                        "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });

            Self { addr, hits }
        }

        /// Accepts connections and never writes a byte back.
        pub(crate) async fn silent() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&hits);

            tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    held.push(socket);
                }
            });

            Self { addr, hits }
        }

        pub(crate) fn url(&self) -> String {
            format!("http://{}", self.addr)
        }

        pub(crate) fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    fn content_length(head: &[u8]) -> usize {
        String::from_utf8_lossy(head)
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Search-timeline body with one complete post per text.
    pub(crate) fn timeline_body(texts: &[&str]) -> String {
        let entries: Vec<Value> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                json!({
                    "entryId": format!("tweet-{}", 100 + i),
                    "content": {"itemContent": {"tweet_results": {"result": {
                        "__typename": "Tweet",
                        "rest_id": format!("{}", 100 + i),
                        "core": {"user_results": {"result": {
                            "rest_id": "7",
                            "legacy": {
                                "screen_name": "alice",
                                "name": "Alice",
                                "followers_count": 42,
                                "can_dm": true
                            }
                        }}},
                        "legacy": {
                            "full_text": text,
                            "created_at": "Wed Oct 10 20:19:24 +0000 2024"
                        }
                    }}}}
                })
            })
            .collect();
        json!({"data": {"search_by_raw_query": {"search_timeline": {"timeline": {
            "instructions": [{"type": "TimelineAddEntries", "entries": entries}]
        }}}}})
        .to_string()
    }
}
