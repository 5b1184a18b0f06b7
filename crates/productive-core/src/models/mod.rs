//! Data models for ProductiveYou resources.
//!
//! - `Task`, `NewTask`: to-do items with due dates, category and team
//! - `Category`: user-defined task grouping
//! - `Team`, `NewTeam`, `TeamMember`: shared task ownership
//! - `Profile`, `ProfileUpdate`: per-user profile page
//! - `Page`, `PageRequest`: the paginated list envelope

pub mod category;
pub mod page;
pub mod profile;
pub mod task;
pub mod team;

pub use category::{Category, NewCategory};
pub use page::{Page, PageRequest};
pub use profile::{Profile, ProfileUpdate};
pub use task::{NewTask, Related, Task, TaskFile};
pub use team::{NewTeam, Team, TeamMember};
