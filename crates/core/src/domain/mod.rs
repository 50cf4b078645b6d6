pub mod card;
pub mod feedback;
pub mod history;
pub mod policy;
pub mod tenant;
