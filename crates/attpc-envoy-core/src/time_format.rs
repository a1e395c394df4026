/// Format a number of seconds as `HH:MM:SS`. Hours are not wrapped.
pub fn pretty_elapsed_time(seconds: u64) -> String {
    let hrs = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hrs:02}:{mins:02}:{secs:02}")
}
