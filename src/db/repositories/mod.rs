pub(super) mod scan_results;
