use salvo::prelude::*;
use tracing::debug;

use crate::web::web_state;

pub const ALIVE_TEXT: &str = "🟢 Bot is alive!";

#[handler]
pub async fn alive(res: &mut Response) {
    if let Some(state) = web_state() {
        debug!("alive check, up {}s", state.started_at.elapsed().as_secs());
    }
    res.render(Text::Plain(ALIVE_TEXT));
}
