pub mod version_compare;
