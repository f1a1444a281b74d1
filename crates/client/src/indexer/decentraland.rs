//! Decentraland scenes from a catalyst content server.
//!
//! Scenes are discovered by asking the catalyst which scene occupies a set
//! of parcel coordinates. Candidates are well-known populated parcels
//! followed by a ring sweep around `(0, 0)`; a per-day ledger keeps
//! repeated runs from rescanning the same parcels.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

use metacrawl_core::{Coordinates, IndexedContent};

use super::{IndexContext, IndexError, Indexer, Platform};
use crate::fetch::{FetchError, RequestOptions};

pub const DEFAULT_ENDPOINT: &str = "https://peer.decentraland.org/content";

/// Genesis Plaza, then the larger districts.
const HOTSPOTS: [(i32, i32); 10] =
    [(-9, -9), (0, 0), (-1, 0), (1, 0), (0, -1), (-20, -20), (20, 20), (-50, 50), (75, -75), (-100, 0)];

const POINTERS_PER_REQUEST: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFile {
    pub file: String,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Scene entity as returned by `/entities/scenes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalystScene {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub pointers: Vec<String>,
    #[serde(default)]
    pub content: Vec<ContentFile>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl CatalystScene {
    /// Parcel named by the first pointer.
    pub fn base_parcel(&self) -> Option<(i32, i32)> {
        self.pointers.first().and_then(|p| parse_pointer(p))
    }

    fn scene_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    /// Identity used to drop the same scene returned for several parcels.
    fn dedup_key(&self) -> String {
        match self.scene_id() {
            Some(id) => id.to_string(),
            None => self.pointers.join(";"),
        }
    }

    fn metadata_str(&self, path: &[&str]) -> Option<String> {
        let mut value = self.metadata.as_ref()?;
        for key in path {
            value = value.get(key)?;
        }
        value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn metadata_field(&self, key: &str) -> Value {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Parse a catalyst pointer of the form `"x,y"`.
pub fn parse_pointer(pointer: &str) -> Option<(i32, i32)> {
    let (x, y) = pointer.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Coordinates to probe: hotspots first, then every ring of the square of
/// `radius` around the origin, without duplicates.
pub fn candidate_coordinates(radius: u32) -> Vec<(i32, i32)> {
    let radius = radius as i32;
    let sweep = (0..=radius).flat_map(|r| {
        (-r..=r)
            .flat_map(move |x| (-r..=r).map(move |y| (x, y)))
            .filter(move |&(x, y)| x.abs().max(y.abs()) == r)
    });

    let mut seen = HashSet::new();
    HOTSPOTS
        .into_iter()
        .chain(sweep)
        .filter(|c| seen.insert(*c))
        .collect()
}

pub struct DecentralandIndexer;

#[async_trait::async_trait]
impl Indexer for DecentralandIndexer {
    type Item = CatalystScene;

    fn platform(&self) -> Platform {
        Platform::Decentraland
    }

    async fn fetch_items(&self, ctx: &IndexContext) -> Result<Vec<CatalystScene>, IndexError> {
        let platform = ctx.platform.as_str();
        let endpoint = ctx.endpoint(DEFAULT_ENDPOINT);
        let domain = ctx.endpoint_domain(&endpoint)?;
        let today = Utc::now().date_naive();

        let scanned = ctx.db().coordinates_scanned_on(platform, today).await?;
        let budget = ctx.config.daily_coordinate_limit.saturating_sub(scanned.len());
        let pending: Vec<(i32, i32)> = candidate_coordinates(ctx.config.search_radius)
            .into_iter()
            .filter(|c| !scanned.contains(c))
            .take(budget)
            .collect();

        if pending.is_empty() {
            tracing::info!(scanned_today = scanned.len(), "no unscanned coordinates left for today");
            return Ok(Vec::new());
        }
        tracing::info!(coordinates = pending.len(), scanned_today = scanned.len(), "sweeping catalyst");

        let options = ctx.request_options(RequestOptions::json(), self.requires_robots_check());
        let max_items = ctx.config.max_items.unwrap_or(usize::MAX);
        let fetch = ctx.fetch();

        let mut scenes = Vec::new();
        let mut seen = HashSet::new();
        let mut succeeded = 0usize;
        let mut last_error = None;

        for chunk in pending.chunks(POINTERS_PER_REQUEST) {
            let pointers: Vec<String> = chunk.iter().map(|(x, y)| format!("{x},{y}")).collect();
            let query: Vec<String> = pointers.iter().map(|p| format!("pointer={p}")).collect();
            let url = format!("{endpoint}/entities/scenes?{}", query.join("&"));
            let joined = pointers.join(";");

            let url_ref = &url;
            let result: Result<Vec<CatalystScene>, IndexError> = ctx
                .cached_json(&["catalyst", "scenes", joined.as_str()], &domain, || async move {
                    Ok(fetch.get_json(url_ref, options).await?)
                })
                .await;

            match result {
                Ok(batch) => {
                    succeeded += 1;
                    ctx.db().record_coordinate_scans(platform, today, chunk).await?;
                    for scene in batch {
                        if seen.insert(scene.dedup_key()) {
                            scenes.push(scene);
                        }
                    }
                    if scenes.len() >= max_items {
                        tracing::debug!(scenes = scenes.len(), "reached max_items, stopping sweep");
                        break;
                    }
                }
                Err(IndexError::Fetch(FetchError::RobotsDisallowed { url })) => {
                    tracing::info!(url = %url, "robots.txt disallows the scene listing, skipping sweep");
                    break;
                }
                Err(e) => {
                    tracing::warn!(pointers = %joined, error = %e, "catalyst request failed");
                    last_error = Some(e);
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        tracing::info!(scenes = scenes.len(), requests_ok = succeeded, "catalyst sweep finished");
        Ok(scenes)
    }

    fn normalize(&self, scene: &CatalystScene) -> Result<IndexedContent, IndexError> {
        let parcel = scene.base_parcel();
        let external_id = scene
            .scene_id()
            .map(str::to_string)
            .or_else(|| parcel.map(|(x, y)| format!("{x},{y}")))
            .ok_or_else(|| IndexError::Normalize("scene has neither an id nor a parcel pointer".into()))?;

        let location = match parcel {
            Some((x, y)) => format!("({x}, {y})"),
            None => "(unknown)".to_string(),
        };

        let title = scene
            .metadata_str(&["display", "title"])
            .unwrap_or_else(|| format!("Scene {location}"));
        let description = scene
            .metadata_str(&["display", "description"])
            .unwrap_or_else(|| format!("Decentraland scene at coordinates {location}"));
        let author = scene
            .metadata_str(&["contact", "name"])
            .or_else(|| scene.metadata_str(&["owner"]));

        let files: Vec<&str> = scene.content.iter().map(|f| f.file.as_str()).collect();
        let metadata = json!({
            "scene_id": scene.scene_id(),
            "scene_type": scene.entity_type,
            "coordinates": parcel.map(|(x, y)| json!({ "x": x, "y": y })),
            "timestamp": scene.timestamp,
            "pointers": scene.pointers,
            "content_files_count": files.len(),
            "content_files": files,
            "scene_metadata": {
                "display": scene.metadata_field("display"),
                "scene": scene.metadata_field("scene"),
                "spawn_points": scene.metadata_field("spawnPoints"),
                "permissions": scene.metadata_field("requiredPermissions"),
                "allowed_media": scene.metadata_field("allowedMediaHostnames"),
            },
        });

        Ok(IndexedContent {
            source_platform: self.platform().as_str().to_string(),
            external_id,
            content_type: scene.entity_type.clone().unwrap_or_else(|| "scene".to_string()),
            title,
            description: Some(description),
            author,
            metadata,
            coordinates: parcel.map(|(x, y)| Coordinates { x, y, platform: self.platform().as_str().to_string() }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{IndexRunner, testing};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scene(id: &str, pointers: &[&str], title: Option<&str>) -> Value {
        let mut metadata = json!({ "owner": "0xowner", "scene": { "base": pointers[0] } });
        if let Some(title) = title {
            metadata["display"] = json!({ "title": title, "description": "A scene" });
        }
        json!({
            "id": id,
            "type": "scene",
            "timestamp": 1_700_000_000_000_i64,
            "pointers": pointers,
            "content": [{ "file": "scene.json", "hash": "bafk1" }, { "file": "game.js", "hash": "bafk2" }],
            "metadata": metadata,
        })
    }

    async fn ctx(server: &MockServer, configure: impl FnOnce(&mut metacrawl_core::IndexerConfig)) -> IndexContext {
        testing::context(Platform::Decentraland, &server.uri(), |c| {
            c.search_radius = 0;
            configure(c);
        })
        .await
    }

    #[test]
    fn test_candidates_start_with_hotspots() {
        assert_eq!(candidate_coordinates(0), HOTSPOTS.to_vec());

        let ring_one = candidate_coordinates(1);
        assert_eq!(ring_one.len(), 15);
        assert_eq!(&ring_one[10..], &[(-1, -1), (-1, 1), (0, 1), (1, -1), (1, 1)]);
    }

    #[test]
    fn test_candidates_cover_square() {
        let radius = 4;
        let cells: HashSet<_> = candidate_coordinates(radius).into_iter().collect();
        for x in -4..=4 {
            for y in -4..=4 {
                assert!(cells.contains(&(x, y)));
            }
        }
        assert_eq!(candidate_coordinates(radius).len(), cells.len());
    }

    #[test]
    fn test_parse_pointer() {
        assert_eq!(parse_pointer("-9,-9"), Some((-9, -9)));
        assert_eq!(parse_pointer(" 12, 3 "), Some((12, 3)));
        assert_eq!(parse_pointer("12"), None);
        assert_eq!(parse_pointer("a,b"), None);
    }

    #[test]
    fn test_normalize_with_display_metadata() {
        let item: CatalystScene =
            serde_json::from_value(scene("bafkscene", &["-9,-9", "-9,-8"], Some("Genesis Plaza"))).unwrap();
        let content = DecentralandIndexer.normalize(&item).unwrap();

        assert_eq!(content.external_id, "bafkscene");
        assert_eq!(content.content_type, "scene");
        assert_eq!(content.title, "Genesis Plaza");
        assert_eq!(content.description.as_deref(), Some("A scene"));
        assert_eq!(content.author.as_deref(), Some("0xowner"));
        assert_eq!(content.coordinates, Some(Coordinates { x: -9, y: -9, platform: "decentraland".into() }));
        assert_eq!(content.metadata["content_files_count"], 2);
        assert_eq!(content.metadata["content_files"][1], "game.js");
        assert_eq!(content.metadata["scene_metadata"]["scene"]["base"], "-9,-9");
    }

    #[test]
    fn test_normalize_fallbacks() {
        let item = CatalystScene {
            id: None,
            entity_type: None,
            timestamp: None,
            pointers: vec!["3,4".into()],
            content: vec![],
            metadata: Some(json!({ "contact": { "name": "Builder" } })),
        };
        let content = DecentralandIndexer.normalize(&item).unwrap();
        assert_eq!(content.external_id, "3,4");
        assert_eq!(content.content_type, "scene");
        assert_eq!(content.title, "Scene (3, 4)");
        assert_eq!(content.description.as_deref(), Some("Decentraland scene at coordinates (3, 4)"));
        assert_eq!(content.author.as_deref(), Some("Builder"));

        let empty = CatalystScene { pointers: vec![], metadata: None, ..item };
        assert!(matches!(DecentralandIndexer.normalize(&empty), Err(IndexError::Normalize(_))));
    }

    #[tokio::test]
    async fn test_sweep_dedups_and_records_ledger() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .and(query_param("pointer", "0,0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                scene("scene-plaza", &["0,0", "1,0"], Some("Plaza")),
                scene("scene-nw", &["-9,-9"], None),
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .and(query_param("pointer", "20,20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                scene("scene-plaza", &["0,0", "1,0"], Some("Plaza")),
                scene("scene-district", &["20,20"], None),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ctx(&server, |_| {}).await;
        let scenes = DecentralandIndexer.fetch_items(&ctx).await.unwrap();
        let ids: Vec<_> = scenes.iter().filter_map(|s| s.id.as_deref()).collect();
        assert_eq!(ids, vec!["scene-plaza", "scene-nw", "scene-district"]);

        let today = Utc::now().date_naive();
        let scanned = ctx.db().coordinates_scanned_on("decentraland", today).await.unwrap();
        assert_eq!(scanned.len(), 10);

        // everything is in the ledger now, so no further requests are made
        assert!(DecentralandIndexer.fetch_items(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_daily_limit_caps_sweep() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ctx(&server, |c| c.daily_coordinate_limit = 3).await;
        DecentralandIndexer.fetch_items(&ctx).await.unwrap();

        let scanned = ctx.db().coordinates_scanned_on("decentraland", Utc::now().date_naive()).await.unwrap();
        assert_eq!(scanned, HashSet::from([(-9, -9), (0, 0), (-1, 0)]));
    }

    #[tokio::test]
    async fn test_failed_chunk_is_not_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .and(query_param("pointer", "0,0"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .and(query_param("pointer", "20,20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([scene("scene-district", &["20,20"], None)])))
            .mount(&server)
            .await;

        let ctx = ctx(&server, |_| {}).await;
        let scenes = DecentralandIndexer.fetch_items(&ctx).await.unwrap();
        assert_eq!(scenes.len(), 1);

        let scanned = ctx.db().coordinates_scanned_on("decentraland", Utc::now().date_naive()).await.unwrap();
        assert_eq!(scanned.len(), 5);
        assert!(!scanned.contains(&(0, 0)));
        assert!(scanned.contains(&(20, 20)));
    }

    #[tokio::test]
    async fn test_all_chunks_failing_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let ctx = ctx(&server, |_| {}).await;
        let err = DecentralandIndexer.fetch_items(&ctx).await.unwrap_err();
        assert!(matches!(err, IndexError::Fetch(crate::fetch::FetchError::Http { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_max_items_stops_sweep() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                scene("scene-a", &["0,0"], None),
                scene("scene-b", &["1,0"], None),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ctx(&server, |c| c.max_items = Some(2)).await;
        assert_eq!(DecentralandIndexer.fetch_items(&ctx).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_full_run_stores_scenes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([scene("scene-plaza", &["0,0"], Some("Plaza"))])))
            .mount(&server)
            .await;

        let ctx = ctx(&server, |_| {}).await;
        let report = IndexRunner::run(&DecentralandIndexer, &ctx).await.unwrap();
        assert_eq!(report.run.items_processed, 1);

        let stored = ctx.db().find_content("decentraland", "scene-plaza").await.unwrap().unwrap();
        assert_eq!(stored.content.title, "Plaza");
        assert_eq!(stored.content.coordinates.map(|c| (c.x, c.y)), Some((0, 0)));
    }

    #[tokio::test]
    async fn test_robots_disallow_completes_empty_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /entities/\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entities/scenes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([scene("scene-plaza", &["0,0"], None)])))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = ctx(&server, |_| {}).await;
        let report = IndexRunner::run(&DecentralandIndexer, &ctx).await.unwrap();

        assert_eq!(report.run.status, metacrawl_core::RunStatus::Completed);
        assert_eq!(report.items_found, 0);
        assert!(ctx.db().coordinates_scanned_on("decentraland", Utc::now().date_naive()).await.unwrap().is_empty());
    }
}
