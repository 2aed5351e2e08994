//! The stock tag handler set.

mod drug_order;
mod group;
mod obs;
mod repeat;
mod section;
mod visit_date;

pub use drug_order::DrugOrderTagHandler;
pub use group::GroupTagHandler;
pub use obs::ObsTagHandler;
pub use repeat::RepeatTagHandler;
pub use section::SectionTagHandler;
pub use visit_date::VisitDateTagHandler;
