use std::io::Write;

use serde::Serialize;

use crate::error::Result;

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer
            .write_all(&buf)
            .map_err(|err| crate::error::IndexError::io("<jsonl>", err))?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|err| crate::error::IndexError::io("<jsonl>", err))
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PassageMetadata;

    #[test]
    fn jsonl_writer_terminates_each_record() {
        let mut writer = JsonlWriter::new(Vec::new());
        writer
            .write_record(&PassageMetadata::new("f1", "a.pdf", Some(1), "one"))
            .unwrap();
        writer
            .write_record(&PassageMetadata::new("f2", "b.pdf", None, "two"))
            .unwrap();
        let buf = writer.into_inner();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: PassageMetadata = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.source_id, "f2");
        assert_eq!(parsed.position, None);
    }
}
