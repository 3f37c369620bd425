pub mod ilo;
