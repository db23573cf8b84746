mod scan_record;

pub use scan_record::ScanRecord;
