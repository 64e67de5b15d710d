use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{LedgerStore, ScanStore};
use crate::indexer::ingester::EventIngester;
use crate::indexer::rpc::ChainConnector;
use crate::indexer::scanner::{ChainScanner, ScanSettings};
use crate::ledger::parser::EventParser;
use crate::scheduler::{Cycle, Scheduler};

/// Scan every chain, then persist the results chain by chain.
pub struct ScanCycle {
    scanner: ChainScanner,
    ingester: EventIngester,
}

impl ScanCycle {
    pub fn new(scanner: ChainScanner, ingester: EventIngester) -> Self {
        Self { scanner, ingester }
    }
}

#[async_trait]
impl Cycle for ScanCycle {
    fn name(&self) -> &'static str {
        "scan"
    }

    async fn run(&self) -> eyre::Result<()> {
        let scans = self.scanner.scan_all().await?;
        if scans.is_empty() {
            return Ok(());
        }

        let summary = self.ingester.ingest(&scans).await;
        tracing::info!(
            chains_written = summary.chains_written,
            chains_failed = summary.chains_failed,
            events = summary.events_inserted,
            "Scan cycle complete"
        );
        Ok(())
    }
}

/// Reconcile one page of unprocessed events into the ledger.
pub struct ParseCycle {
    parser: EventParser,
}

impl ParseCycle {
    pub fn new(parser: EventParser) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl Cycle for ParseCycle {
    fn name(&self) -> &'static str {
        "parse"
    }

    async fn run(&self) -> eyre::Result<()> {
        let summary = self.parser.run_once().await?;
        if summary.fetched > 0 {
            tracing::info!(
                fetched = summary.fetched,
                applied = summary.applied,
                ignored = summary.ignored,
                malformed = summary.malformed,
                ledger_failures = summary.ledger_failures,
                marked = summary.marked,
                "Parse cycle complete"
            );
        }
        Ok(())
    }
}

pub type SyncScheduler = Scheduler<ScanCycle>;
pub type ParseScheduler = Scheduler<ParseCycle>;

/// Wire both loops around one injected store and RPC connector.
pub fn build_schedulers<S>(
    store: Arc<S>,
    connector: Arc<dyn ChainConnector>,
    config: &Config,
) -> (Arc<SyncScheduler>, Arc<ParseScheduler>)
where
    S: ScanStore + LedgerStore + 'static,
{
    let scanner = ChainScanner::new(
        store.clone(),
        connector,
        ScanSettings {
            block_range: config.scan.block_range,
            confirmation_lag: config.scan.confirmation_lag,
        },
    );
    let ingester = EventIngester::new(store.clone(), config.scan.batch_size);
    let sync = Scheduler::new(ScanCycle::new(scanner, ingester), config.scan.interval());

    let parser = EventParser::new(store, config.parse.page_size);
    let parse = Scheduler::new(ParseCycle::new(parser), config.parse.interval());

    (Arc::new(sync), Arc::new(parse))
}
