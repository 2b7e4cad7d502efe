use std::time::Instant;

use dex_core::{DexConfig, EntityDetails, FetchError, FetchResult, NameIndexEntry, Sprites, Stat};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{id_from_url, normalize_identifier, ListedEntity, RemoteSource};

/// REST client for a PokeAPI-shaped catalog.
pub struct HttpSource {
    client: Client,
    base_url: String,
    name_index_limit: usize,
}

#[derive(Deserialize)]
struct ListResponse {
    results: Option<Vec<NamedResource>>,
}

#[derive(Deserialize)]
struct NamedResource {
    name: String,
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct DetailsResponse {
    id: u32,
    name: String,
    #[serde(default)]
    types: Vec<TypeSlot>,
    #[serde(default)]
    abilities: Vec<AbilitySlot>,
    #[serde(default)]
    moves: Vec<MoveSlot>,
    #[serde(default)]
    sprites: Sprites,
    #[serde(default)]
    stats: Vec<StatSlot>,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    weight: u32,
}

#[derive(Deserialize)]
struct TypeSlot {
    #[serde(rename = "type")]
    ty: NamedResource,
}

#[derive(Deserialize)]
struct AbilitySlot {
    ability: NamedResource,
}

#[derive(Deserialize)]
struct MoveSlot {
    #[serde(rename = "move")]
    mv: NamedResource,
}

#[derive(Deserialize)]
struct StatSlot {
    base_stat: u32,
    stat: NamedResource,
}

impl From<DetailsResponse> for EntityDetails {
    fn from(r: DetailsResponse) -> Self {
        Self {
            id: r.id,
            name: r.name,
            types: r.types.into_iter().map(|t| t.ty.name).collect(),
            abilities: r.abilities.into_iter().map(|a| a.ability.name).collect(),
            moves: r.moves.into_iter().map(|m| m.mv.name).collect(),
            sprites: r.sprites,
            stats: r.stats.into_iter().map(|s| Stat { name: s.stat.name, value: s.base_stat }).collect(),
            height: r.height,
            weight: r.weight,
        }
    }
}

impl HttpSource {
    pub fn new(cfg: &DexConfig) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| FetchError::Remote(format!("building http client: {}", e)))?;
        let mut base_url = cfg.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { client, base_url, name_index_limit: cfg.name_index_limit })
    }

    async fn get_json<T: DeserializeOwned>(&self, op: &'static str, path: &str, query: &[(&str, usize)]) -> FetchResult<T> {
        let started = Instant::now();
        let url = format!("{}{}", self.base_url, path);
        metrics::counter!("remote_requests_total", 1, "op" => op);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Remote(format!("{} request failed: {}", op, e)))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Remote(format!("{} returned status {}", op, status)));
        }
        let body = resp
            .json::<T>()
            .await
            .map_err(|e| FetchError::Remote(format!("unexpected response format: {}", e)))?;
        metrics::histogram!("remote_request_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => op);
        debug!(op, url = %url, took_ms = %started.elapsed().as_millis(), "remote: ok");
        Ok(body)
    }

    async fn list(&self, op: &'static str, offset: usize, limit: usize) -> FetchResult<Vec<NamedResource>> {
        let resp: ListResponse = self.get_json(op, "pokemon", &[("offset", offset), ("limit", limit)]).await?;
        resp.results.ok_or_else(|| FetchError::Remote("unexpected response format: missing results".into()))
    }
}

#[async_trait::async_trait]
impl RemoteSource for HttpSource {
    async fn fetch_page(&self, offset: usize, limit: usize) -> FetchResult<Vec<ListedEntity>> {
        if limit == 0 {
            return Err(FetchError::InvalidArgument("limit must be greater than zero".into()));
        }
        let rows = self.list("page", offset, limit).await.map_err(|e| {
            warn!(offset, limit, error = %e, "remote: page fetch failed");
            e
        })?;
        Ok(rows.into_iter().map(|r| ListedEntity { id: id_from_url(&r.url), name: r.name }).collect())
    }

    async fn fetch_details(&self, identifier: &str) -> FetchResult<EntityDetails> {
        let ident = normalize_identifier(identifier);
        if ident.is_empty() {
            return Err(FetchError::InvalidArgument("name or id is required".into()));
        }
        let resp: DetailsResponse = self.get_json("details", &format!("pokemon/{}", ident), &[]).await?;
        Ok(resp.into())
    }

    async fn fetch_all_names(&self) -> Vec<NameIndexEntry> {
        match self.list("names", 0, self.name_index_limit).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|r| id_from_url(&r.url).map(|id| NameIndexEntry { name: r.name, id }))
                .collect(),
            Err(e) => {
                warn!(error = %e, "remote: name list unavailable; continuing with empty list");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_wire_format_is_flattened() {
        let raw = serde_json::json!({
            "id": 25,
            "name": "pikachu",
            "height": 4,
            "weight": 60,
            "types": [{ "slot": 1, "type": { "name": "electric", "url": "https://pokeapi.co/api/v2/type/13/" } }],
            "abilities": [{ "ability": { "name": "static", "url": "" } }],
            "moves": [{ "move": { "name": "thunder-shock", "url": "" } }],
            "stats": [{ "base_stat": 35, "stat": { "name": "hp", "url": "" } }],
            "sprites": { "front_default": "https://img/25.png", "other": {} }
        });
        let wire: DetailsResponse = serde_json::from_value(raw).expect("decode");
        let d: EntityDetails = wire.into();
        assert_eq!(d.id, 25);
        assert_eq!(d.types, vec!["electric".to_string()]);
        assert_eq!(d.abilities, vec!["static".to_string()]);
        assert_eq!(d.moves, vec!["thunder-shock".to_string()]);
        assert_eq!(d.stats, vec![Stat { name: "hp".into(), value: 35 }]);
        assert_eq!(d.sprites.front_default.as_deref(), Some("https://img/25.png"));
        assert_eq!(d.sprites.back_default, None);
    }

    /// Local server answering every request with the same status line and JSON body.
    async fn canned(status: &'static str, body: &'static str) -> HttpSource {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                while read < buf.len() {
                    match sock.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => read += n,
                    }
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let resp = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        let cfg = DexConfig { base_url: format!("http://{}/", addr), ..DexConfig::default() };
        HttpSource::new(&cfg).expect("client")
    }

    #[tokio::test]
    async fn listing_rows_take_id_from_url() {
        let src = canned(
            "200 OK",
            r#"{"count":2,"results":[{"name":"bulbasaur","url":"https://pokeapi.co/api/v2/pokemon/1/"},{"name":"ivysaur","url":"https://pokeapi.co/api/v2/pokemon/2/"}]}"#,
        )
        .await;
        let rows = src.fetch_page(0, 2).await.expect("page");
        assert_eq!(rows[0], ListedEntity { id: Some("1".into()), name: "bulbasaur".into() });
        assert_eq!(rows[1].id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn missing_entity_maps_to_not_found() {
        let src = canned("404 Not Found", r#""Not Found""#).await;
        let err = src.fetch_details("missingno").await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn server_error_maps_to_remote() {
        let src = canned("500 Internal Server Error", "{}").await;
        let err = src.fetch_page(0, 10).await.unwrap_err();
        assert!(matches!(&err, FetchError::Remote(m) if m.contains("500")), "{:?}", err);
        assert!(err.is_retryable());
        let err = src.fetch_details("pikachu").await.unwrap_err();
        assert!(matches!(err, FetchError::Remote(_)));
    }

    #[tokio::test]
    async fn name_list_degrades_to_empty_on_server_error() {
        let src = canned("500 Internal Server Error", "{}").await;
        assert!(src.fetch_all_names().await.is_empty());
    }

    #[tokio::test]
    async fn body_without_results_is_a_format_error() {
        let src = canned("200 OK", r#"{"count":0}"#).await;
        let err = src.fetch_page(0, 10).await.unwrap_err();
        assert!(matches!(&err, FetchError::Remote(m) if m.starts_with("unexpected response format")), "{:?}", err);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_format_error() {
        let src = canned("200 OK", "not json").await;
        let err = src.fetch_details("pikachu").await.unwrap_err();
        assert!(matches!(&err, FetchError::Remote(m) if m.starts_with("unexpected response format")), "{:?}", err);
    }

    #[tokio::test]
    async fn zero_limit_is_rejected_before_io() {
        let cfg = DexConfig { base_url: "http://127.0.0.1:9/".into(), ..DexConfig::default() };
        let src = HttpSource::new(&cfg).expect("client");
        let err = src.fetch_page(0, 0).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidArgument(_)));
        let err = src.fetch_details("   ").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidArgument(_)));
    }
}
