pub mod challans;
pub mod consignments;
pub mod stock;
