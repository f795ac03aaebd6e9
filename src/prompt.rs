use crate::models::Message;
use crate::relay::models::OutboundMessage;

/// Catalog export interpolated into the system instruction. In production
/// this blob is regenerated from the storefront inventory.
pub const BOOK_CATALOG: &str = r#"Store: Paper Lantern Books (https://www.paperlanternbooks.com)
Shipping: free over $35, otherwise $4.99 flat. Returns accepted within 30 days.
Browse all books at https://www.paperlanternbooks.com/books

Fiction:
- "The Midnight Library" by Matt Haig, $13.99, https://www.paperlanternbooks.com/books/the-midnight-library
- "Klara and the Sun" by Kazuo Ishiguro, $16.00, https://www.paperlanternbooks.com/books/klara-and-the-sun
- "Sea of Tranquility" by Emily St. John Mandel, $17.99, https://www.paperlanternbooks.com/books/sea-of-tranquility

Non-fiction:
- "Four Thousand Weeks" by Oliver Burkeman, $15.99, https://www.paperlanternbooks.com/books/four-thousand-weeks
- "Entangled Life" by Merlin Sheldrake, $18.00, https://www.paperlanternbooks.com/books/entangled-life

Poetry:
- "Devotions" by Mary Oliver, $20.00, https://www.paperlanternbooks.com/books/devotions

Gift cards from $10 to $200 at https://www.paperlanternbooks.com/gift-cards"#;

/// Upstream role for a widget message. The storefront only distinguishes
/// customer turns; everything else rides along as instruction context.
pub fn role_for(message: &Message) -> &'static str {
    if message.is_user_message {
        "user"
    } else {
        "system"
    }
}

/// Renders the fixed system instruction around a catalog blob. Built once
/// at startup and shared by every request.
pub fn build_system_prompt(catalog: &str) -> String {
    format!(
        "You are a helpful customer support assistant embedded on a bookstore website. \
Answer customer questions using this bookstore data:\n\n{catalog}\n\n\
Only include links in markdown format, \
for example: 'You can browse our poetry [here](https://www.paperlanternbooks.com/books)'. \
Apart from links, reply in plain text. \
Refuse to answer anything unrelated to the bookstore or its catalog. \
Keep answers short and concise."
    )
}

/// Maps a validated history to upstream turns, with the system instruction
/// prepended as the first message.
pub fn assemble(system_prompt: &str, history: &[Message]) -> Vec<OutboundMessage> {
    let mut outbound = Vec::with_capacity(history.len() + 1);
    outbound.push(OutboundMessage {
        role: "system".to_string(),
        content: system_prompt.to_string(),
    });
    for message in history {
        outbound.push(OutboundMessage {
            role: role_for(message).to_string(),
            content: message.text.clone(),
        });
    }
    outbound
}
