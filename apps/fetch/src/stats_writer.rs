//! Periodic statistics sampling to CSV.

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ndnrtc_core::StatisticsStorage;

const SAMPLE_PERIOD_MS: u64 = 1000;

/// Samples the shared statistics storage once per second and appends one
/// CSV row per sample. The header row lists the indicator abbreviations.
pub struct StatsWriter {
    writer: csv::Writer<std::fs::File>,
    stats: StatisticsStorage,
}

impl StatsWriter {
    pub fn create(path: &Path, stats: StatisticsStorage) -> anyhow::Result<Self> {
        let file = std::fs::File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);

        let header: Vec<String> = stats
            .snapshot()
            .iter()
            .map(|(i, _)| i.abbreviation().to_string())
            .collect();
        writer.write_record(&header)?;
        writer.flush()?;

        Ok(StatsWriter { writer, stats })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(Duration::from_millis(SAMPLE_PERIOD_MS));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.write_sample() {
                        log::warn!("[fetch] stats write failed: {}", e);
                        break;
                    }
                }
            }
        }
        let _ = self.writer.flush();
    }

    fn write_sample(&mut self) -> anyhow::Result<()> {
        let row: Vec<String> = self
            .stats
            .snapshot()
            .iter()
            .map(|(_, v)| format!("{:.2}", v))
            .collect();
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndnrtc_core::Indicator;

    #[test]
    fn header_and_rows_share_the_column_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let stats = StatisticsStorage::consumer();
        stats.add(Indicator::BytesReceived, 1234.);

        let mut writer = StatsWriter::create(&path, stats.clone()).unwrap();
        writer.write_sample().unwrap();
        writer.write_sample().unwrap();
        drop(writer);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3, "header plus two samples");
        let columns = lines[0].split(',').count();
        assert!(lines.iter().all(|l| l.split(',').count() == columns));
        assert!(lines[0].split(',').any(|c| c == "bytes"));
        assert!(lines[1].split(',').any(|c| c == "1234.00"));
    }
}
