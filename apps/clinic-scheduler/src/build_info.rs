//! Metadados de build gerados pelo `built`

include!(concat!(env!("OUT_DIR"), "/built.rs"));
