//! The `runqc parse` area: run one metric-file parser and dump its
//! normalized output as JSON. This is the debugging surface for the parser
//! layer — point it at any pipeline output file and see exactly what the
//! tracker would ingest.

pub mod command;
