use std::error::Error;
use std::sync::Arc;

use jdscript::{
    Literal,
    MemoryFetcher,
    MemoryScreenshotStore,
    Playground,
    ScreenshotStore,
    StaticBrowser,
};
use serde_json::json;
use tokio::runtime::Runtime;

const CATALOG: &str = r#"
    <html><body>
        <ul>
            <li class="item"><span class="name">alpha</span><span class="price">10</span></li>
            <li class="item"><span class="name">beta</span><span class="price">12</span></li>
            <li class="item"><span class="name">gamma</span></li>
        </ul>
    </body></html>
"#;

const PROFILE: &str = r#"
    <html><body>
        <section class="profile"><h2 class="handle">beta-tester</h2></section>
    </body></html>
"#;

fn playground_with(fixtures: &[(&str, &str)]) -> (Playground, Arc<MemoryScreenshotStore>) {
    let fetcher = MemoryFetcher::new();
    for (url, document) in fixtures {
        fetcher.insert(*url, *document);
    }
    let store = Arc::new(MemoryScreenshotStore::new());
    let playground = Playground::builder()
        .with_browser(Arc::new(StaticBrowser::from_fetcher(Arc::new(fetcher))))
        .with_screenshot_store(store.clone())
        .build()
        .expect("building with an injected browser does not fail");
    (playground, store)
}

#[tokio::test]
async fn uploaded_script_runs_to_completion() {
    let (playground, store) = playground_with(&[("https://catalog.test/items?q=rust", CATALOG)]);

    let created = playground.create(
        "origin: https://catalog.test/items?q={{query}}\n\
         field: query rust\n\
         var: attempt 1\n\
         open\n\
         select_all: .item\n\
         save_selection: items\n\
         select_from: items .price\n\
         close",
    );
    assert!(created.diagnostics.is_empty(), "clean script, got {:?}", created.diagnostics);
    assert_eq!(created.assembly.len(), 8);

    let id = created.snapshot.id;
    let mut snapshot = created.snapshot;
    while !snapshot.finished {
        snapshot = playground.step(id).await.expect("step");
    }

    assert_eq!(snapshot.instruction_pointer, 8);
    assert_eq!(snapshot.origin, "https://catalog.test/items?q=rust");
    assert_eq!(snapshot.fields["query"], "rust");
    assert_eq!(snapshot.vars["attempt"], Literal::Number(1.0));

    // open, select_all, save_selection and select_from each ran with a session open.
    assert_eq!(store.len(), 4);
    let last = snapshot.last_screenshot.expect("auto capture");
    assert_eq!(last, format!("{id}-4"));
    let bytes = store.retrieve(&last).await.unwrap().expect("persisted");
    assert_eq!(bytes.as_ref(), CATALOG.as_bytes());

    // The final close dropped the session, so there is nothing left to capture.
    assert_eq!(playground.screenshot(id).await.unwrap(), None);
}

#[tokio::test]
async fn instances_do_not_share_state() {
    let (playground, _store) = playground_with(&[
        ("https://catalog.test/items", CATALOG),
        ("https://profile.test/me", PROFILE),
    ]);

    let first = playground
        .create("origin: https://catalog.test/items\nvar: who alpha\nopen\nclose")
        .snapshot
        .id;
    let second = playground
        .create("origin: https://profile.test/me\nvar: who beta\nopen")
        .snapshot
        .id;
    assert_ne!(first, second);

    // Interleave the two runs instruction by instruction.
    for _ in 0..3 {
        playground.step(first).await.unwrap();
        playground.step(second).await.unwrap();
    }
    let first_snapshot = playground.step(first).await.unwrap();
    let second_snapshot = playground.snapshot(second).await.unwrap();

    assert!(first_snapshot.finished);
    assert!(second_snapshot.finished);
    assert_eq!(first_snapshot.origin, "https://catalog.test/items");
    assert_eq!(second_snapshot.origin, "https://profile.test/me");
    assert_eq!(first_snapshot.vars["who"], Literal::Str("alpha".into()));
    assert_eq!(second_snapshot.vars["who"], Literal::Str("beta".into()));

    // The first instance closed its session; the second still holds its own.
    assert_eq!(playground.screenshot(first).await.unwrap(), None);
    let live = playground.screenshot(second).await.unwrap();
    assert_eq!(live, Some(format!("{second}-2")));
}

#[tokio::test]
async fn distinct_instances_step_concurrently() {
    let (playground, _store) = playground_with(&[("https://catalog.test/items", CATALOG)]);

    let script = "origin: https://catalog.test/items\nopen\nselect_all: .item\nclose";
    let first = playground.create(script).snapshot.id;
    let second = playground.create(script).snapshot.id;

    for _ in 0..4 {
        let (left, right) = tokio::join!(playground.step(first), playground.step(second));
        left.unwrap();
        right.unwrap();
    }

    assert!(playground.snapshot(first).await.unwrap().finished);
    assert!(playground.snapshot(second).await.unwrap().finished);
    assert!(playground.remove(first).await);
    assert!(playground.remove(second).await);
    assert!(playground.instance_ids().is_empty());
}

#[tokio::test]
async fn created_instances_serialize_for_the_hosting_api() {
    let (playground, _store) = playground_with(&[]);
    let created = playground.create("var: retries 3\nfoo: 1");

    let value = serde_json::to_value(&created).unwrap();
    assert_eq!(value["assembly"][0]["command"], "var");
    assert_eq!(value["assembly"][0]["arguments"], json!(["retries", 3]));
    assert_eq!(value["assembly"][1]["command"], "foo");
    assert_eq!(value["diagnostics"][0]["kind"], "unknown-command");
    assert_eq!(value["diagnostics"][0]["severity"], "error");
    assert_eq!(value["diagnostics"][0]["line"], 2);
    assert_eq!(value["snapshot"]["instructionCount"], 2);
    assert_eq!(value["snapshot"]["instructionPointer"], 0);
    assert_eq!(value["snapshot"]["finished"], false);
    assert!(value["snapshot"]["lastScreenshot"].is_null());
}

#[test]
#[ignore = "requires network access"]
fn live_roundtrip_against_example_com() -> Result<(), Box<dyn Error>> {
    let runtime = Runtime::new()?;
    let playground = Playground::new()?;

    let created = playground.create(
        "origin: https://example.com/\n\
         open\n\
         select: h1\n\
         save_selection: heading\n\
         close",
    );
    assert!(created.diagnostics.is_empty());

    let id = created.snapshot.id;
    let mut snapshot = created.snapshot;
    while !snapshot.finished {
        snapshot = runtime.block_on(playground.step(id))?;
    }

    println!("instance {} finished at {}", id, snapshot.instruction_pointer);
    println!("last screenshot: {:?}", snapshot.last_screenshot);
    Ok(())
}
