use stampede::error::AppResult;

fn main() -> AppResult<()> {
    stampede::entry::run()
}
