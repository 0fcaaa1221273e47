pub mod fits;

pub use fits::{read_fits, read_fits_header, write_fits, FitsHeader, FitsValue};
