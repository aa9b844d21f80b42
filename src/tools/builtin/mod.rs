pub mod calendar;
pub mod memory_search;
pub mod memory_store;
pub mod time;

pub use calendar::{
    CalendarBackend, CalendarEvent, CalendarReadTool, CalendarWriteTool, InMemoryCalendar,
    NewCalendarEvent, CALENDAR_READ_PERMISSION, CALENDAR_WRITE_PERMISSION,
};
pub use memory_search::MemorySearchTool;
pub use memory_store::MemoryStoreTool;
pub use time::CurrentTimeTool;
