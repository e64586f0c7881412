//! HTTP client for the shipment data service.
//!
//! Thin REST wrapper used by the dashboard to list and manage shipments and
//! trackers, fetch historical tracker records and geocode addresses. All
//! calls share one pooled client and retry with exponential backoff on
//! transport errors and 429 responses.

use std::time::{Duration, Instant};

use base64::Engine;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::error::{Result, TrackerError};
use crate::geocode::GeocodeCache;
use crate::records::{normalize_history, parse_history, Geolocation, HistoricalBatch, HistoricalRecord};
use crate::shipment::{NewShipment, Shipment, Tracker};
use crate::telemetry::Timestamp;
use crate::GeoPoint;

/// Configuration for [`ShipmentClient`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the REST API, e.g. `https://api.example.com/v1`
    pub base_url: String,

    /// Optional API key, sent as HTTP basic auth (`API_KEY:<key>`)
    pub api_key: Option<String>,

    /// Per-request timeout.
    /// Default: 30 seconds
    pub timeout: Duration,

    /// Retries after the first attempt on transport errors or 429.
    /// Default: 3
    pub max_retries: u32,

    /// Concurrent requests when fetching history for several trackers.
    /// Default: 8
    pub max_concurrency: usize,

    /// First retry delay, doubled per retry up to 8x.
    /// Default: 500 ms (1s, 2s, 4s, 4s... after the first retry)
    pub retry_backoff: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            max_concurrency: 8,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Client for the shipment data service.
pub struct ShipmentClient {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    max_retries: u32,
    max_concurrency: usize,
    retry_backoff: Duration,
}

impl ShipmentClient {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.timeout)
            .build()
            .map_err(|e| TrackerError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: config.api_key.as_deref().map(basic_auth),
            max_retries: config.max_retries,
            max_concurrency: config.max_concurrency.max(1),
            retry_backoff: config.retry_backoff,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_header {
            Some(auth) => request.header("Authorization", auth),
            None => request,
        }
    }

    /// Send a request, retrying on transport errors and 429s.
    ///
    /// `build` is called once per attempt since a sent request is consumed.
    async fn send<F>(&self, url: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let start = Instant::now();

        loop {
            match self.authorize(build()).send().await {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    retries += 1;
                    if retries > self.max_retries {
                        return Err(TrackerError::RetriesExhausted { url: url.to_string(), attempts: retries });
                    }
                    let wait = backoff_delay(self.retry_backoff, retries);
                    warn!("[ShipmentClient] 429 from {}, retry {} after {:?}", url, retries, wait);
                    tokio::time::sleep(wait).await;
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(TrackerError::Status { status: resp.status().as_u16(), url: url.to_string() });
                }
                Ok(resp) => {
                    debug!("[ShipmentClient] {} answered in {:?}", url, start.elapsed());
                    return Ok(resp);
                }
                Err(e) => {
                    retries += 1;
                    if retries > self.max_retries {
                        warn!("[ShipmentClient] Giving up on {}: {}", url, e);
                        return Err(TrackerError::RetriesExhausted { url: url.to_string(), attempts: retries });
                    }
                    let wait = backoff_delay(self.retry_backoff, retries);
                    warn!("[ShipmentClient] Error on {}: {}, retry {} after {:?}", url, e, retries, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        let resp = self.send(url, || self.client.get(url).query(query)).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn list_shipments(&self) -> Result<Vec<Shipment>> {
        let url = self.url("shipments");
        let bytes = self.get_json(&url, &[]).await?;
        let shipments: Vec<Shipment> = serde_json::from_slice(&bytes)?;
        info!("[ShipmentClient] Listed {} shipments", shipments.len());
        Ok(shipments)
    }

    /// Validate and create a shipment, returning it as stored by the service.
    pub async fn create_shipment(&self, shipment: &NewShipment) -> Result<Shipment> {
        shipment.validate()?;
        let url = self.url("shipments");
        let resp = self.send(&url, || self.client.post(&url).json(shipment)).await?;
        let created: Shipment = serde_json::from_slice(&resp.bytes().await?)?;
        info!("[ShipmentClient] Created shipment {} ({})", created.id, created.name);
        Ok(created)
    }

    pub async fn delete_shipment(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("shipments/{}", id));
        self.send(&url, || self.client.delete(&url)).await?;
        info!("[ShipmentClient] Deleted shipment {}", id);
        Ok(())
    }

    pub async fn list_trackers(&self) -> Result<Vec<Tracker>> {
        let url = self.url("trackers");
        let bytes = self.get_json(&url, &[]).await?;
        let trackers: Vec<Tracker> = serde_json::from_slice(&bytes)?;
        info!("[ShipmentClient] Listed {} trackers", trackers.len());
        Ok(trackers)
    }

    /// Raw historical records of one tracker between `start` and `end`.
    pub async fn get_historical_route(
        &self,
        tracker_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<HistoricalRecord>> {
        let url = self.url(&format!("trackers/{}/history", tracker_id));
        let query = [
            ("start", start.as_millis().to_string()),
            ("end", end.as_millis().to_string()),
        ];
        let bytes = self.get_json(&url, &query).await?;
        let records = parse_history(&bytes)?;
        debug!("[ShipmentClient] {} history records for {}", records.len(), tracker_id);
        Ok(records)
    }

    /// Historical records normalized for [`RouteTelemetryReconciler::load_batch`](crate::RouteTelemetryReconciler::load_batch).
    pub async fn get_historical_batch(
        &self,
        tracker_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<HistoricalBatch> {
        let records = self.get_historical_route(tracker_id, start, end).await?;
        Ok(normalize_history(&records))
    }

    /// Fetch history for several trackers concurrently.
    ///
    /// Results come back in completion order, each paired with its tracker id.
    pub async fn get_historical_routes(
        &self,
        tracker_ids: Vec<String>,
        start: Timestamp,
        end: Timestamp,
    ) -> Vec<(String, Result<Vec<HistoricalRecord>>)> {
        use futures::stream::{self, StreamExt};

        let total = tracker_ids.len();
        let started = Instant::now();

        let results: Vec<(String, Result<Vec<HistoricalRecord>>)> = stream::iter(tracker_ids)
            .map(|id| async move {
                let result = self.get_historical_route(&id, start, end).await;
                (id, result)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(
            "[ShipmentClient] History for {} trackers in {:.2}s ({} failed)",
            total,
            started.elapsed().as_secs_f64(),
            failed
        );
        results
    }

    /// Resolve an address to coordinates, consulting `cache` first.
    pub async fn geocode(&self, address: &str, cache: &mut GeocodeCache) -> Result<GeoPoint> {
        if let Some(point) = cache.get(address) {
            return Ok(point);
        }

        let url = self.url("geocode");
        let bytes = self.get_json(&url, &[("address", address.to_string())]).await?;
        let point = parse_geocode(&bytes)?
            .ok_or_else(|| TrackerError::GeocodeNotFound(address.to_string()))?;

        cache.insert(address, point);
        Ok(point)
    }

    /// Geocode every location of `shipment` that has no coordinates yet.
    pub async fn resolve_locations(&self, shipment: &mut NewShipment, cache: &mut GeocodeCache) -> Result<()> {
        let locations = std::iter::once(&mut shipment.origin)
            .chain(shipment.stops.iter_mut())
            .chain(std::iter::once(&mut shipment.destination));

        for location in locations {
            if location.point.is_none() {
                location.point = Some(self.geocode(&location.address, cache).await?);
            }
        }
        Ok(())
    }
}

fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base * (1u32 << retry.min(3))
}

fn basic_auth(api_key: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("API_KEY:{}", api_key));
    format!("Basic {}", encoded)
}

/// Geocoder responses: a lat/lng object, a GeoJSON point, or a list of
/// candidates (first one wins).
fn parse_geocode(bytes: &[u8]) -> Result<Option<GeoPoint>> {
    let value: Value = serde_json::from_slice(bytes)?;
    let candidate = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        Value::Array(_) => return Ok(None),
        other => other,
    };
    let location: Option<Geolocation> = serde_json::from_value(candidate).ok();
    Ok(location.and_then(|l| l.to_point()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::shipment::Location;

    /// One-connection-at-a-time HTTP/1.1 server on a random local port.
    /// `handler` gets the zero-based hit number and the request line and
    /// returns the status and JSON body. Every request line is recorded.
    async fn serve<H>(handler: H) -> (String, Arc<Mutex<Vec<String>>>)
    where
        H: Fn(usize, &str) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let head = read_head(&mut socket).await;
                let line = head.lines().next().unwrap_or_default().to_string();
                let hit = {
                    let mut log = log.lock().unwrap();
                    log.push(line.clone());
                    log.len() - 1
                };

                let (status, body) = handler(hit, &line);
                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (base_url, seen)
    }

    async fn read_head(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn local_client(base_url: &str, max_retries: u32) -> ShipmentClient {
        ShipmentClient::new(ServiceConfig {
            base_url: base_url.to_string(),
            max_retries,
            retry_backoff: Duration::from_millis(1),
            ..ServiceConfig::default()
        })
        .unwrap()
    }

    fn hits(seen: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        seen.lock().unwrap().clone()
    }

    #[test]
    fn test_url_joining() {
        let client = ShipmentClient::new(ServiceConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            ..ServiceConfig::default()
        })
        .unwrap();
        assert_eq!(client.url("/shipments"), "https://api.example.com/v1/shipments");
        assert_eq!(client.url("trackers/t-1/history"), "https://api.example.com/v1/trackers/t-1/history");
    }

    #[test]
    fn test_basic_auth() {
        // base64("API_KEY:secret")
        assert_eq!(basic_auth("secret"), "Basic QVBJX0tFWTpzZWNyZXQ=");
    }

    #[test]
    fn test_parse_geocode_shapes() {
        assert_eq!(
            parse_geocode(br#"{"lat": 53.55, "lng": 9.99}"#).unwrap(),
            Some(GeoPoint::new(53.55, 9.99))
        );
        assert_eq!(
            parse_geocode(br#"[{"lat": "48.85", "lon": "2.35", "display_name": "Paris"}, {"lat": 0, "lon": 0}]"#).unwrap(),
            Some(GeoPoint::new(48.85, 2.35))
        );
        assert_eq!(
            parse_geocode(br#"{"type": "Point", "coordinates": [9.99, 53.55]}"#).unwrap(),
            Some(GeoPoint::new(53.55, 9.99))
        );
        assert_eq!(parse_geocode(b"[]").unwrap(), None);
        assert!(parse_geocode(b"nope").is_err());
    }

    #[tokio::test]
    async fn test_geocode_served_from_cache() {
        // Unroutable base URL: any network call would fail
        let client = ShipmentClient::new(ServiceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            ..ServiceConfig::default()
        })
        .unwrap();

        let mut cache = GeocodeCache::default();
        cache.insert("Hamburg", GeoPoint::new(53.55, 9.99));

        let point = client.geocode("hamburg", &mut cache).await.unwrap();
        assert_eq!(point, GeoPoint::new(53.55, 9.99));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_without_request() {
        let client = ShipmentClient::new(ServiceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            ..ServiceConfig::default()
        })
        .unwrap();

        let result = client.create_shipment(&NewShipment::default()).await;
        assert!(matches!(result, Err(TrackerError::InvalidShipment(_))));
    }

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 9), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_retries_after_429_then_succeeds() {
        let (base_url, seen) = serve(|hit, _| match hit {
            0 | 1 => (429, String::new()),
            _ => (200, r#"[{"id": "t-1", "name": "Reefer 1", "lastSeen": 1709294400}]"#.to_string()),
        })
        .await;

        let trackers = local_client(&base_url, 3).list_trackers().await.unwrap();
        assert_eq!(trackers.len(), 1);
        assert_eq!(trackers[0].last_seen, Some(Timestamp(1_709_294_400_000)));

        let hits = hits(&seen);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|line| line.starts_with("GET /trackers ")));
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let (base_url, seen) = serve(|_, _| (404, r#"{"error": "not found"}"#.to_string())).await;

        let err = local_client(&base_url, 3).delete_shipment("s-404").await.unwrap_err();
        match err {
            TrackerError::Status { status, url } => {
                assert_eq!(status, 404);
                assert!(url.ends_with("/shipments/s-404"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(hits(&seen), vec!["DELETE /shipments/s-404 HTTP/1.1".to_string()]);
    }

    #[tokio::test]
    async fn test_persistent_429_exhausts_retries() {
        let (base_url, seen) = serve(|_, _| (429, String::new())).await;

        let err = local_client(&base_url, 2).list_shipments().await.unwrap_err();
        assert!(matches!(err, TrackerError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(hits(&seen).len(), 3);
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = local_client(&base_url, 1).list_trackers().await.unwrap_err();
        assert!(matches!(err, TrackerError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_historical_routes_for_several_trackers() {
        let (base_url, seen) = serve(|_, line| {
            if line.contains("/trackers/t-1/history") {
                (200, r#"{"data": [{"ts": 1000, "lat": 1, "lng": 2}, {"ts": 2000, "lat": 1.5, "lng": 2}]}"#.to_string())
            } else {
                (404, String::new())
            }
        })
        .await;

        let client = local_client(&base_url, 0);
        let mut results = client
            .get_historical_routes(
                vec!["t-1".to_string(), "t-2".to_string()],
                Timestamp::from_millis(1_000),
                Timestamp::from_millis(2_000),
            )
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1.as_ref().unwrap().len(), 2);
        assert!(matches!(results[1].1, Err(TrackerError::Status { status: 404, .. })));

        let hits = hits(&seen);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|line| line.contains("?start=1000&end=2000")));
    }

    #[tokio::test]
    async fn test_resolve_locations_fills_missing_points() {
        let (base_url, seen) = serve(|_, line| {
            if line.contains("address=Kassel") {
                (200, r#"{"lat": 51.31, "lng": 9.48}"#.to_string())
            } else {
                (200, "[]".to_string())
            }
        })
        .await;

        let client = local_client(&base_url, 0);
        let mut cache = GeocodeCache::default();
        let mut shipment = NewShipment {
            name: "Parts".to_string(),
            tracker_id: None,
            origin: Location::resolved("Hamburg", GeoPoint::new(53.55, 9.99)),
            destination: Location::new("Kassel"),
            stops: vec![Location::new("Kassel")],
        };

        client.resolve_locations(&mut shipment, &mut cache).await.unwrap();
        assert_eq!(shipment.stops[0].point, Some(GeoPoint::new(51.31, 9.48)));
        assert_eq!(shipment.destination.point, Some(GeoPoint::new(51.31, 9.48)));
        // Origin was resolved already and the second Kassel came from the cache
        assert_eq!(hits(&seen).len(), 1);
        assert_eq!(cache.len(), 1);

        shipment.stops.push(Location::new("Nowhere"));
        let err = client.resolve_locations(&mut shipment, &mut cache).await.unwrap_err();
        assert!(matches!(err, TrackerError::GeocodeNotFound(ref a) if a == "Nowhere"));
        assert_eq!(hits(&seen).len(), 2);
    }
}
