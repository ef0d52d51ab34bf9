use super::Sink;
use crate::error::SinkError;
use crate::event::EventRecord;
use crate::render::OutputTemplate;
use async_trait::async_trait;
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

/// Writes one rendered line per record.
///
/// Lines are rendered before the writer lock is taken and written with a single `write_all`,
/// so concurrent emitters never interleave within a line.
pub struct ConsoleSink {
    name: String,
    template: OutputTemplate,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout(template: OutputTemplate) -> Self {
        Self::with_writer(template, Box::new(std::io::stdout()))
    }

    /// Console layout to an arbitrary writer.
    pub fn with_writer(template: OutputTemplate, writer: Box<dyn Write + Send>) -> Self {
        Self { name: "console".to_string(), template, writer: Mutex::new(writer) }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn template(&self) -> &OutputTemplate {
        &self.template
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::stdout(OutputTemplate::console())
    }
}

impl fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("name", &self.name)
            .field("template", &self.template.source())
            .finish()
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        let line = self.template.render(record);
        let mut writer = self.writer.lock().map_err(|_| SinkError::Closed)?;
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().map_err(|_| SinkError::Closed)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Level, Properties};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn writes_console_layout() {
        let buf = SharedBuf::default();
        let sink = ConsoleSink::with_writer(OutputTemplate::console(), Box::new(buf.clone()));
        let record = EventRecord::builder(Level::Warning, "Cache miss for {Key}")
            .at(Utc.with_ymd_and_hms(2024, 1, 5, 7, 8, 9).unwrap())
            .property("Key", "user:42")
            .build();
        sink.write(&record).await.unwrap();
        assert_eq!(buf.text(), "[07:08:09 WRN] Cache miss for user:42 {}\n");
    }

    #[tokio::test]
    async fn concurrent_writes_do_not_interleave() {
        let buf = SharedBuf::default();
        let template = OutputTemplate::parse("{Message}{NewLine}").unwrap();
        let sink = Arc::new(ConsoleSink::with_writer(template, Box::new(buf.clone())));
        let mut tasks = Vec::new();
        for i in 0..50 {
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                let msg = format!("line-{i}-{}", "x".repeat(64));
                sink.write(&EventRecord::new(Level::Info, msg, Properties::new())).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let text = buf.text();
        assert_eq!(text.lines().count(), 50);
        assert!(text.lines().all(|l| l.starts_with("line-") && l.ends_with(&"x".repeat(64))));
    }
}
