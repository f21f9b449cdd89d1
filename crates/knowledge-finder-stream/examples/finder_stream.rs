//! Asks one question and prints the answer as it streams.
//!
//! Runs against a canned replay by default; set `KNOWLEDGE_FINDER_MODE=live`
//! and `DIFY_API_KEY` to talk to a real Dify app.
use std::io::Write as _;
use std::time::Duration;

use knowledge_finder_stream::config::load_dotenv;
use knowledge_finder_stream::observability::init_observability;
use knowledge_finder_stream::prelude::*;

const CANNED: &str = concat!(
    "data: {\"event\":\"workflow_started\",\"data\":{\"id\":\"run-1\"}}\n\n",
    "data: {\"event\":\"node_started\",\"data\":{\"id\":\"n-1\",\"title\":\"Knowledge Retrieval\"}}\n\n",
    "data: {\"event\":\"node_finished\",\"data\":{\"id\":\"n-1\",\"status\":\"succeeded\",\"elapsed_time\":0.21}}\n\n",
    "data: {\"event\":\"message\",\"answer\":\"The handbook lives in \"}\n\n",
    "data: {\"event\":\"message\",\"answer\":\"Shared Drive / People.\"}\n\n",
    "data: {\"event\":\"message_end\",\"metadata\":{\"retriever_resources\":[{\"position\":1,\"document_name\":\"handbook.md\"}]}}\n\n",
);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), FinderError> {
    load_dotenv();
    init_observability();

    let mock = ReplayBackend::chunked(CANNED, 24).delay(Duration::from_millis(30));
    let mut finder = Finder::builder()
        .config(FinderConfig::from_env()?)
        .backend_for_mode(mock)?
        .build()?;

    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Where is the employee handbook?".to_string());
    let mut run = finder.ask(query).await?;

    let mut printed = 0;
    while let Some(update) = run.next_update().await {
        if let Some(answer) = update.state.answer() {
            print!("{}", answer.text.get(printed..).unwrap_or_default());
            printed = answer.text.len();
            let _ = std::io::stdout().flush();
        }
    }
    println!();

    let report = run.finish().await?;
    for entry in report.state.log() {
        println!("  [{:?}] {}", entry.status, entry.title);
    }
    finder.record(&report);
    report.into_result().map(|_| ())
}
