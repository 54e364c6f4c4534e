use crate::domain::payment::PaymentResponse;
use crate::error::Result;
use std::io::Write;

/// Writes payment responses as CSV with the header
/// `transaction_id,status,code,message`.
pub struct ResponseWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ResponseWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_responses(
        &mut self,
        responses: impl IntoIterator<Item = PaymentResponse>,
    ) -> Result<()> {
        for response in responses {
            self.writer.serialize(response)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
