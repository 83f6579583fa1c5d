pub mod style_selector;

pub use style_selector::{blended_reward, HintStyleSelector, SelectionReason, StyleSelection};
