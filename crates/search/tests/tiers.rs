use std::sync::Arc;
use std::time::Duration;

use dex_remote::{fixture, MockSource, RemoteSource};
use dex_search::{project, suggestions, type_options, NameIndexCell, SearchPhase, SearchResolver, TypeFilter};
use dex_store::{spawn_enricher, CatalogStore, EnrichOpts, Pager};

struct World {
    src: Arc<MockSource>,
    catalog: Arc<CatalogStore>,
    pager: Pager,
    resolver: SearchResolver,
    enricher: dex_store::EnricherHandle,
}

async fn world(src: MockSource, limit: usize) -> World {
    let src = Arc::new(src);
    let dyn_src: Arc<dyn RemoteSource> = src.clone();
    let catalog = Arc::new(CatalogStore::new());
    let enricher = spawn_enricher(dyn_src.clone(), catalog.clone(), EnrichOpts { batch_size: 5, delay: Duration::from_millis(250) });
    let pager = Pager::new(dyn_src.clone(), catalog.clone(), enricher.clone(), limit);
    let names = Arc::new(NameIndexCell::new());
    names.load(dyn_src.as_ref()).await;
    let resolver = SearchResolver::new(catalog.clone(), names, dyn_src);
    World { src, catalog, pager, resolver, enricher }
}

fn kanto() -> MockSource {
    let mut records = vec![
        fixture(1, "bulbasaur", &["grass", "poison"]),
        fixture(4, "charmander", &["fire"]),
        fixture(7, "squirtle", &["water"]),
        fixture(25, "pikachu", &["electric"]),
        fixture(26, "raichu", &["electric"]),
    ];
    records.push(fixture(150, "mewtwo", &["psychic"]));
    records.push(fixture(151, "mew", &["psychic"]));
    MockSource::from_details(records)
}

#[tokio::test(start_paused = true)]
async fn loaded_entity_is_found_locally() {
    let w = world(kanto(), 5).await;
    w.pager.load_next_page().await.expect("page");
    w.enricher.wait_idle().await;
    let fetched = w.src.details_calls();

    let st = w.resolver.resolve("pikachu").await;
    assert_eq!(st.phase, SearchPhase::Resolved(None));
    assert_eq!(w.src.details_calls(), fetched, "tier 1 never touches the network");

    let view = project(&w.catalog.current(), &TypeFilter::All, &st);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].name, "pikachu");
}

#[tokio::test(start_paused = true)]
async fn indexed_entity_is_fetched_once() {
    let w = world(kanto(), 5).await;
    w.pager.load_next_page().await.expect("page");
    w.enricher.wait_idle().await;
    let fetched = w.src.details_calls();

    let st = w.resolver.resolve("Mew").await;
    assert_eq!(w.src.details_calls(), fetched + 1);
    let view = project(&w.catalog.current(), &TypeFilter::parse("electric"), &st);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].name, "mew");
    assert!(view[0].details_loaded);
}

#[tokio::test(start_paused = true)]
async fn unknown_term_leaves_list_unfiltered() {
    let w = world(kanto(), 5).await;
    w.pager.load_next_page().await.expect("page");
    w.enricher.wait_idle().await;
    let fetched = w.src.details_calls();

    let st = w.resolver.resolve("xyzzy").await;
    assert_eq!(st.phase, SearchPhase::NotFound);
    assert_eq!(w.src.details_calls(), fetched);
    assert_eq!(project(&w.catalog.current(), &TypeFilter::All, &st).len(), 5);
}

#[tokio::test(start_paused = true)]
async fn type_options_follow_enrichment() {
    let w = world(kanto(), 5).await;
    w.pager.load_next_page().await.expect("page");
    assert_eq!(type_options(&w.catalog.current()), vec!["all"], "nothing enriched yet");
    w.enricher.wait_idle().await;
    assert_eq!(
        type_options(&w.catalog.current()),
        vec!["all", "electric", "fire", "grass", "poison", "water"]
    );
    assert_eq!(suggestions(&w.catalog.current(), "chu", 8), vec!["pikachu", "raichu"]);
}
