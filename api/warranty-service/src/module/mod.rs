pub mod warranty;
